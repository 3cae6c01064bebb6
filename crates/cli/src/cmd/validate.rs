use anyhow::Context;
use clap::Args;
use ddocache_core::strip_system_fields;
use ddocache_validator::Validator;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the DDO JSON file
    file: PathBuf,
    /// Chain id to validate against (defaults to the document's chainId)
    #[arg(long)]
    chain_id: Option<u64>,
    /// NFT address to validate against (defaults to the document's nftAddress)
    #[arg(long)]
    nft: Option<String>,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<Value> {
    let mut ddo = super::read_json(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let chain_id = args
        .chain_id
        .or_else(|| ddo.get("chainId").and_then(Value::as_u64))
        .unwrap_or(0);
    let nft = args
        .nft
        .or_else(|| ddo.get("nftAddress").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    strip_system_fields(&mut ddo);

    let report = Validator::new()?.validate_dict(&ddo, chain_id, &nft)?;
    Ok(json!({
        "valid": report.conforms,
        "errors": report.errors,
    }))
}
