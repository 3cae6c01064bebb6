use anyhow::{anyhow, Context};
use clap::Args;
use ddocache_core::codec::{decode_payload, encode_payload, PayloadFlags};
use ddocache_core::sha256;
use k256::{PublicKey, SecretKey};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct EncodeArgs {
    /// Path to the DDO JSON file; its bytes are encoded as-is
    file: PathBuf,
    /// Flags byte: bit 0 = lzma, bit 1 = ecies
    #[arg(long, default_value_t = 0)]
    flags: u8,
    /// Recipient public key for ecies (SEC1 hex, compressed or not)
    #[arg(long)]
    recipient: Option<String>,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Hex payload as emitted in the event's data field
    #[arg(long)]
    data: String,
    /// Flags byte of the event
    #[arg(long, default_value_t = 0)]
    flags: u8,
    /// Private key for ecies (32-byte hex). Also read from PRIVATE_KEY.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
}

pub fn run_encode(args: EncodeArgs) -> anyhow::Result<Value> {
    let plaintext = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    serde_json::from_slice::<Value>(&plaintext)
        .with_context(|| format!("{} is not JSON", args.file.display()))?;

    let recipient = args
        .recipient
        .as_deref()
        .map(|hex_key| {
            PublicKey::from_sec1_bytes(&super::parse_hex(hex_key)?)
                .map_err(|_| anyhow!("invalid recipient public key"))
        })
        .transpose()?;

    let flags = PayloadFlags::new(args.flags);
    let data = encode_payload(&plaintext, flags, recipient.as_ref())?;

    Ok(json!({
        "flags": format!("0x{:02x}", flags.bits()),
        "data": format!("0x{}", hex::encode(data)),
        "metaDataHash": format!("0x{}", hex::encode(sha256(&plaintext))),
    }))
}

pub fn run_decode(args: DecodeArgs) -> anyhow::Result<Value> {
    let data = super::parse_hex(&args.data).context("data is not hex")?;
    let secret = args
        .private_key
        .as_deref()
        .map(|hex_key| {
            SecretKey::from_slice(&super::parse_hex(hex_key)?)
                .map_err(|_| anyhow!("invalid private key"))
        })
        .transpose()?;

    let plaintext = decode_payload(&data, PayloadFlags::new(args.flags), secret.as_ref())?;
    let ddo: Value =
        serde_json::from_slice(&plaintext).context("decoded payload is not JSON")?;

    Ok(json!({
        "metaDataHash": format!("0x{}", hex::encode(sha256(&plaintext))),
        "ddo": ddo,
    }))
}
