use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Debug, Parser)]
#[command(name = "ddocache")]
#[command(about = "Offline DDO metadata cache operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute the did of an NFT on a chain.
    Did(cmd::did::DidArgs),
    /// Validate a DDO JSON file.
    Validate(cmd::validate::ValidateArgs),
    /// Encode a DDO file as event payload and print its metadata hash.
    Encode(cmd::encode::EncodeArgs),
    /// Decode an event payload back into the DDO.
    Decode(cmd::encode::DecodeArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let output = match cli.command {
        Command::Did(args) => cmd::did::run(args)?,
        Command::Validate(args) => cmd::validate::run(args)?,
        Command::Encode(args) => cmd::encode::run_encode(args)?,
        Command::Decode(args) => cmd::encode::run_decode(args)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
