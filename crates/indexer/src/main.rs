//! DDO indexer service.
//!
//! Note: the HTTP API is served by the separate `ddocache-api` binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ddocache_indexer::config::{Config, LoggingConfig};
use ddocache_indexer::storage::{CursorKind, Storage};
use ddocache_indexer::IndexerShell;
use tracing::info;

#[derive(Parser)]
#[command(name = "ddocache-indexer")]
#[command(version, about = "Multi-chain DDO metadata indexer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitors, retry workers and reconciliation
    Run,

    /// Show cursors and database statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://ddocache.db")]
        database_url: String,
    },

    /// Move a chain's logs cursor to a block
    ResetCursor {
        /// Chain to reset
        #[arg(long)]
        chain_id: u64,
        /// Next block to scan
        #[arg(long)]
        block: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    match command {
        Commands::Run => {
            let config = Config::from_file(&cli.config).context("Failed to load configuration")?;
            init_logging(cli.debug, &config.logging);
            info!("DDO indexer starting, version {}", env!("CARGO_PKG_VERSION"));
            run_indexer(config).await?
        }
        Commands::Status => {
            init_logging(cli.debug, &LoggingConfig::default());
            show_status(&cli.config).await?
        }
        Commands::InitDb { database_url } => {
            init_logging(cli.debug, &LoggingConfig::default());
            init_database(&database_url).await?
        }
        Commands::ResetCursor { chain_id, block } => {
            init_logging(cli.debug, &LoggingConfig::default());
            reset_cursor(&cli.config, chain_id, block).await?
        }
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("ddocache_indexer=debug,ddocache_validator=debug,sqlx=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "ddocache_indexer={0},ddocache_validator={0}",
                logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

async fn run_indexer(config: Config) -> Result<()> {
    for chain in &config.chains {
        info!(
            "  Chain {} ({}): {}",
            chain.chain_id, chain.network, chain.rpc_url
        );
    }
    info!("  Database: {}", config.database.url);

    let shell = IndexerShell::new(config).await?;
    shell.run().await
}

async fn open_storage(config_path: &str) -> Result<Storage> {
    let (database_url, max_conn, min_conn) = match Config::from_file(config_path) {
        Ok(config) => (
            config.database.url,
            Some(config.database.max_connections),
            Some(config.database.min_connections),
        ),
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
            });
            if !is_not_found {
                return Err(e).context("Failed to load config file");
            }
            let url = std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://ddocache.db".to_string());
            info!("Config file not found, using database {}", url);
            (url, None, None)
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    Ok(storage)
}

async fn show_status(config_path: &str) -> Result<()> {
    let storage = open_storage(config_path).await?;
    let stats = storage.stats().await?;

    println!("\n=== DDO Indexer Status ===\n");
    println!("Chains:");
    if stats.chains.is_empty() {
        println!("  (none indexed yet)");
    }
    for (chain_id, _) in &stats.chains {
        if let Some(status) = storage.get_cursor_status(*chain_id, CursorKind::Logs).await? {
            println!(
                "  {}: next block {} (updated {})",
                chain_id,
                status.last_block,
                chrono::DateTime::from_timestamp(status.updated_at, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
    }

    println!("\nDatabase Statistics:");
    println!("  DDOs: {}", stats.ddo_count);
    println!("  Retry queue: {}", stats.retry_count);
    println!("  State records: {}", stats.state_count);
    println!();

    storage.close().await;
    Ok(())
}

async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  DDOs: {}", stats.ddo_count);
    info!("  Retry queue: {}", stats.retry_count);

    storage.close().await;
    Ok(())
}

async fn reset_cursor(config_path: &str, chain_id: u64, block: u64) -> Result<()> {
    let storage = open_storage(config_path).await?;
    storage
        .reset_cursor(chain_id, CursorKind::Logs, block)
        .await
        .context("Failed to reset cursor")?;
    info!("Chain {} will resume at block {}", chain_id, block);
    storage.close().await;
    Ok(())
}
