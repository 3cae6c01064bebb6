//! Checks a schema cannot express: the document's identity against the event
//! that carried it, and the shape of `@context`.

use std::collections::BTreeMap;

use ddocache_core::{make_did, Address};
use serde_json::Value;

/// Record `message` for `path` unless an earlier check already did.
pub(crate) fn report(errors: &mut BTreeMap<String, String>, path: &str, message: String) {
    errors.entry(path.to_string()).or_insert(message);
}

/// Run every structural check, appending failures to `errors`.
pub fn check(doc: &Value, chain_id: u64, nft_address: &str, errors: &mut BTreeMap<String, String>) {
    match doc.get("@context") {
        None | Some(Value::Null) => report(errors, "@context", "Missing @context".to_string()),
        Some(Value::Array(_)) | Some(Value::Object(_)) => {}
        Some(_) => report(
            errors,
            "@context",
            "@context must be a list or an object".to_string(),
        ),
    }

    if chain_id == 0 {
        report(errors, "chainId", "chainId must be non-zero".to_string());
    }

    let address = match nft_address.parse::<Address>() {
        Ok(address) if nft_address.starts_with("0x") => Some(address),
        _ => {
            report(
                errors,
                "nftAddress",
                format!("{nft_address} is not a valid address"),
            );
            None
        }
    };

    if let Some(declared) = doc.get("chainId").and_then(Value::as_u64) {
        if chain_id != 0 && declared != chain_id {
            report(
                errors,
                "chainId",
                format!("chainId {declared} does not match event chain {chain_id}"),
            );
        }
    }

    if let Some(declared) = doc.get("nftAddress").and_then(Value::as_str) {
        if !declared.eq_ignore_ascii_case(nft_address) {
            report(
                errors,
                "nftAddress",
                format!("nftAddress {declared} does not match event contract {nft_address}"),
            );
        }
    }

    if let (Some(address), Some(id)) = (address, doc.get("id").and_then(Value::as_str)) {
        if chain_id != 0 {
            let expected = make_did(&address, chain_id);
            if !expected.as_str().eq_ignore_ascii_case(id) {
                report(
                    errors,
                    "id",
                    format!("did {id} does not match expected {expected}"),
                );
            }
        }
    }
}
