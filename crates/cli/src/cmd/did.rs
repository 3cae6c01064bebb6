use anyhow::Context;
use clap::Args;
use ddocache_core::{make_did, Address};
use serde_json::{json, Value};

#[derive(Debug, Args)]
pub struct DidArgs {
    /// Data NFT contract address (0x...)
    #[arg(long)]
    nft: String,
    /// Chain id the NFT lives on
    #[arg(long)]
    chain_id: u64,
}

pub fn run(args: DidArgs) -> anyhow::Result<Value> {
    let nft: Address = args
        .nft
        .parse()
        .with_context(|| format!("invalid NFT address: {}", args.nft))?;
    let did = make_did(&nft, args.chain_id);
    Ok(json!({
        "did": did.to_string(),
        "nftAddress": nft.to_string(),
        "chainId": args.chain_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_ignores_address_case() {
        let lower = run(DidArgs {
            nft: "0x6f7f1e9b3b8ffaa3e04e1b66e4f1b2c7d6d9c8e1".into(),
            chain_id: 8996,
        })
        .unwrap();
        let upper = run(DidArgs {
            nft: "0x6F7F1E9B3B8FFAA3E04E1B66E4F1B2C7D6D9C8E1".into(),
            chain_id: 8996,
        })
        .unwrap();
        assert_eq!(lower["did"], upper["did"]);
        assert!(lower["did"].as_str().unwrap().starts_with("did:op:"));
    }

    #[test]
    fn bad_address_is_an_error() {
        let err = run(DidArgs {
            nft: "0x1234".into(),
            chain_id: 1,
        })
        .unwrap_err();
        assert!(err.to_string().contains("invalid NFT address"));
    }
}
