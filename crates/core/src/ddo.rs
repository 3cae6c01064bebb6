//! Typed DDO documents.
//!
//! Only the schema-owned part of a stored document lives here; the fields the
//! cache maintains itself are in [`crate::asset`]. Unknown keys survive a
//! parse/serialize cycle through the `extra` maps.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::did::{make_did, Did};
use crate::error::{CoreError, Result};
use crate::types::{DdoVersion, ServiceType};

/// A validated DDO as published by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ddo {
    /// JSON-LD context (list or object).
    #[serde(rename = "@context")]
    pub context: Value,
    /// Asset identifier, must equal `make_did(nft_address, chain_id)`.
    pub id: Did,
    /// Schema version.
    pub version: DdoVersion,
    /// Chain the data NFT lives on.
    pub chain_id: u64,
    /// Data NFT contract.
    pub nft_address: Address,
    /// Descriptive metadata.
    pub metadata: Metadata,
    /// Offered services.
    #[serde(default)]
    pub services: Vec<Service>,
    /// Allow/deny lists for consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `metadata` section of a DDO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// ISO-8601 creation time.
    pub created: String,
    /// ISO-8601 last update time.
    pub updated: String,
    /// `dataset` or `algorithm`.
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Publisher-declared author.
    pub author: String,
    /// License identifier or URL.
    pub license: String,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright_holder: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_information: Option<Value>,
    /// Container and language description, present for algorithms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Value>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier, unique within the DDO.
    pub id: String,
    /// Access or compute.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Datatoken gating this service.
    pub datatoken_address: Address,
    /// Provider URL serving the files.
    pub service_endpoint: String,
    /// Encrypted file descriptor (opaque to the cache).
    pub files: Value,
    /// Access validity in seconds, `0` means unlimited.
    pub timeout: u64,
    /// Compute options, required for compute services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<Value>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_parameters: Option<Value>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_information: Option<Value>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ddo {
    /// Parse a DDO from its JSON form.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CoreError::MalformedDocument(e.to_string()))
    }

    /// Serialize back into a JSON object.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| CoreError::MalformedDocument(e.to_string()))
    }

    /// Whether `id` is the did derived from `nftAddress` and `chainId`.
    pub fn id_matches(&self) -> bool {
        self.id == make_did(&self.nft_address, self.chain_id)
    }

    /// Find the service gated by a datatoken.
    pub fn service_for_datatoken(&self, datatoken: &Address) -> Option<&Service> {
        self.services
            .iter()
            .find(|service| &service.datatoken_address == datatoken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(nft: Address, chain_id: u64) -> Value {
        json!({
            "@context": ["https://w3id.org/did/v1"],
            "id": make_did(&nft, chain_id).to_string(),
            "version": "4.1.0",
            "chainId": chain_id,
            "nftAddress": nft.to_string(),
            "metadata": {
                "created": "2021-12-20T14:35:20Z",
                "updated": "2021-12-20T14:35:20Z",
                "type": "dataset",
                "name": "weather",
                "description": "hourly readings",
                "author": "met office",
                "license": "MIT",
                "tags": ["weather"],
                "customField": 7
            },
            "services": [{
                "id": "svc-1",
                "type": "access",
                "datatokenAddress": Address::repeat_byte(0x22).to_string(),
                "serviceEndpoint": "https://provider.example",
                "files": "0xdeadbeef",
                "timeout": 0
            }],
            "nftExtension": {"a": 1}
        })
    }

    #[test]
    fn test_parse_and_preserve_unknown_keys() {
        let nft = Address::repeat_byte(0x11);
        let ddo = Ddo::from_value(sample(nft, 1337)).unwrap();

        assert!(ddo.id_matches());
        assert_eq!(ddo.version, DdoVersion::V4_1_0);
        assert_eq!(ddo.metadata.name, "weather");
        assert_eq!(ddo.metadata.extra.get("customField"), Some(&json!(7)));
        assert_eq!(ddo.extra.get("nftExtension"), Some(&json!({"a": 1})));

        let back = ddo.to_value().unwrap();
        assert_eq!(back["metadata"]["customField"], json!(7));
        assert_eq!(back["nftExtension"], json!({"a": 1}));
        assert!(back.get("credentials").is_none());
    }

    #[test]
    fn test_service_lookup_and_id_mismatch() {
        let nft = Address::repeat_byte(0x11);
        let mut value = sample(nft, 1337);
        value["chainId"] = json!(8996);
        let ddo = Ddo::from_value(value).unwrap();

        assert!(!ddo.id_matches());
        assert!(ddo
            .service_for_datatoken(&Address::repeat_byte(0x22))
            .is_some());
        assert!(ddo
            .service_for_datatoken(&Address::repeat_byte(0x33))
            .is_none());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut value = sample(Address::repeat_byte(0x11), 1);
        value["version"] = json!("3.0.0");
        assert!(Ddo::from_value(value).is_err());
    }
}
