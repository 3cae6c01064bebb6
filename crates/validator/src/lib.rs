//! # DDO Validator
//!
//! Validates DDO documents against the JSON Schema of their declared version,
//! plus the identity checks that tie a document to its data NFT:
//!
//! ```text
//! ┌───────────────┐   version gate   ┌──────────────┐
//! │ DDO (JSON)    │ ───────────────► │ Schema 4.x.y │ ── schema errors ─┐
//! └───────────────┘                  └──────────────┘                   │
//!         │                                                             ▼
//!         └──────── structural checks (did, chain, address) ──► ValidationReport
//! ```
//!
//! Schemas are embedded at build time and compiled once; [`Validator::new`]
//! fails if any of them does not compile, which callers treat as a startup
//! error.

#![warn(missing_docs)]

pub mod error;
pub mod structural;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use ddocache_core::{DdoVersion, ALLOWED_VERSIONS};
use jsonschema::error::ValidationErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::ValidatorError;

const SCHEMA_4_1_0: &str = include_str!("../schemas/4.1.0.json");
const SCHEMA_4_3_0: &str = include_str!("../schemas/4.3.0.json");
const SCHEMA_4_5_0: &str = include_str!("../schemas/4.5.0.json");

/// Message used for a missing required field.
pub const MISSING_VALUE: &str = "Less than 1 values";

/// Outcome of validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when `errors` is empty.
    pub conforms: bool,
    /// Field path to message.
    pub errors: BTreeMap<String, String>,
}

impl ValidationReport {
    fn from_errors(errors: BTreeMap<String, String>) -> Self {
        Self {
            conforms: errors.is_empty(),
            errors,
        }
    }

    /// Single-line summary for logs and state records.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|(path, message)| format!("{path}: {message}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validator holding one compiled schema per allowed version.
pub struct Validator {
    schemas: HashMap<DdoVersion, jsonschema::Validator>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut versions: Vec<_> = self.schemas.keys().map(DdoVersion::as_str).collect();
        versions.sort_unstable();
        f.debug_struct("Validator").field("versions", &versions).finish()
    }
}

impl Validator {
    /// Compile the embedded schemas.
    pub fn new() -> Result<Self, ValidatorError> {
        Self::from_sources([
            (DdoVersion::V4_1_0, SCHEMA_4_1_0),
            (DdoVersion::V4_3_0, SCHEMA_4_3_0),
            (DdoVersion::V4_5_0, SCHEMA_4_5_0),
        ])
    }

    /// Build a validator from explicit schema sources.
    ///
    /// Each schema pins its version through `properties.version.const`, which
    /// must agree with the version it is registered under.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = (DdoVersion, &'a str)>,
    ) -> Result<Self, ValidatorError> {
        let mut schemas = HashMap::new();
        for (version, source) in sources {
            let invalid = |reason: String| ValidatorError::InvalidSchema {
                version: version.to_string(),
                reason,
            };

            let schema: Value =
                serde_json::from_str(source).map_err(|e| invalid(e.to_string()))?;
            let declared = schema
                .pointer("/properties/version/const")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("schema does not pin a version".to_string()))?;
            if declared != version.as_str() {
                return Err(invalid(format!("file declares version {declared}")));
            }

            let compiled =
                jsonschema::validator_for(&schema).map_err(|e| invalid(e.to_string()))?;
            schemas.insert(version, compiled);
        }
        Ok(Self { schemas })
    }

    /// Validate a DDO as a JSON dict for the given chain and NFT contract.
    ///
    /// System fields must already be stripped. An `Err` means the validator
    /// itself is broken; a non-conforming document is reported through
    /// [`ValidationReport::errors`].
    pub fn validate_dict(
        &self,
        ddo: &Value,
        chain_id: u64,
        nft_address: &str,
    ) -> Result<ValidationReport, ValidatorError> {
        let mut errors = BTreeMap::new();

        if !ddo.is_object() {
            errors.insert("ddo".to_string(), "Document must be a JSON object".to_string());
            return Ok(ValidationReport::from_errors(errors));
        }

        match ddo.get("version").and_then(Value::as_str) {
            None => {
                errors.insert("version".to_string(), MISSING_VALUE.to_string());
            }
            Some(raw) => match raw.parse::<DdoVersion>() {
                Ok(version) => {
                    let schema = self
                        .schemas
                        .get(&version)
                        .ok_or(ValidatorError::MissingSchema(version))?;
                    for error in schema.iter_errors(ddo) {
                        let pointer = error.instance_path.to_string();
                        let (path, message) = match &error.kind {
                            ValidationErrorKind::Required { property } => {
                                let property = property.as_str().unwrap_or_default();
                                (join(&field_path(&pointer), property), MISSING_VALUE.to_string())
                            }
                            _ => (field_path(&pointer), error.to_string()),
                        };
                        structural::report(&mut errors, &path, message);
                    }
                }
                Err(_) => {
                    errors.insert(
                        "version".to_string(),
                        format!(
                            "Unsupported version {raw}, expected one of {}",
                            ALLOWED_VERSIONS.join(", ")
                        ),
                    );
                }
            },
        }

        structural::check(ddo, chain_id, nft_address, &mut errors);

        let report = ValidationReport::from_errors(errors);
        if !report.conforms {
            tracing::debug!(chain_id, nft_address, errors = %report.summary(), "DDO failed validation");
        }
        Ok(report)
    }
}

/// Turn a JSON pointer into the dotted field path used in reports:
/// `/services/0/timeout` becomes `services[0].timeout`.
fn field_path(pointer: &str) -> String {
    let mut path = String::new();
    for token in pointer.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&token);
            path.push(']');
        } else {
            path = join(&path, &token);
        }
    }
    if path.is_empty() {
        "ddo".to_string()
    } else {
        path
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() || prefix == "ddo" {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_schemas_load() {
        let validator = Validator::new().unwrap();
        for version in DdoVersion::ALL {
            assert!(validator.schemas.contains_key(&version));
        }
    }

    #[test]
    fn test_field_path_from_pointer() {
        assert_eq!(field_path(""), "ddo");
        assert_eq!(field_path("/metadata/name"), "metadata.name");
        assert_eq!(field_path("/services/0/timeout"), "services[0].timeout");
        assert_eq!(
            field_path("/services/1/consumerParameters/0/type"),
            "services[1].consumerParameters[0].type"
        );
        assert_eq!(join(&field_path(""), "@context"), "@context");
    }

    #[test]
    fn test_schema_without_version_is_fault() {
        let result = Validator::from_sources([(DdoVersion::V4_1_0, r#"{"type": "object"}"#)]);
        assert!(matches!(
            result,
            Err(ValidatorError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_version_mismatch_is_fault() {
        let result = Validator::from_sources([(DdoVersion::V4_3_0, SCHEMA_4_1_0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_schema_is_fault() {
        let validator = Validator::from_sources([(DdoVersion::V4_1_0, SCHEMA_4_1_0)]).unwrap();
        let doc = serde_json::json!({"version": "4.5.0"});
        assert!(matches!(
            validator.validate_dict(&doc, 1, "0x0000000000000000000000000000000000000001"),
            Err(ValidatorError::MissingSchema(DdoVersion::V4_5_0))
        ));
    }
}
