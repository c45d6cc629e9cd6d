//! vault-custody - build, sign, broadcast and confirm vault operations
//!
//! # WARNING
//! - Sent transactions move real funds and cannot be recalled.
//! - Check unsigned transactions with `inspect` before signing them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use vault_custody::cli::commands;
use vault_custody::config::Config;

/// Custody engine for vault operations on a UTXO ledger
#[derive(Parser)]
#[command(name = "vault-custody")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration (secrets masked)
    Config,

    /// Check Ocean endpoint, wallet and notifications
    Health,

    /// Show the native balance of the configured address
    Balance,

    /// List spendable outputs of the configured address
    Utxos {
        /// Maximum number of outputs to list
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show the current block height
    Height,

    /// Show account token balances of the configured address
    Tokens,

    /// Show collateral, loans and ratio of the configured vault
    Vault,

    /// List liquidity pools
    Pools {
        /// Only pools containing this token symbol
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Show the fixed-interval USD price of a token
    Price {
        /// Token symbol, e.g. DUSD
        token: String,
    },

    /// Wait until a transaction is visible on chain
    Wait {
        /// Transaction id
        txid: String,

        /// Height the transaction was sent at (default: current height)
        #[arg(long)]
        start_block: Option<u64>,
    },

    /// Send signed raw transactions
    Broadcast {
        /// Hex-encoded transactions, in order
        #[arg(required = true)]
        hex: Vec<String>,

        /// Move each transaction onto the change of the previous one
        #[arg(long)]
        chain: bool,
    },

    /// Decode a raw transaction and show the operation it carries
    Inspect {
        /// Hex-encoded transaction
        hex: String,
    },

    /// Sign and send transactions built elsewhere
    SignAndSend {
        /// Hex-encoded transactions, in order
        #[arg(required = true)]
        hex: Vec<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vault_custody=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    let result = match cli.command {
        // Decoding needs no configuration
        Commands::Inspect { hex } => commands::inspect(&hex),
        command => {
            // Load configuration
            let config = match Config::load(&cli.config) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    std::process::exit(1);
                }
            };
            info!(
                "Using {} on {} for {}",
                config.ocean.url, config.ocean.network, config.wallet.address
            );
            run(command, &config).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Config => commands::show_config(config),
        Commands::Health => commands::health(config).await,
        Commands::Balance => commands::balance(config).await,
        Commands::Utxos { limit } => commands::utxos(config, limit).await,
        Commands::Height => commands::height(config).await,
        Commands::Tokens => commands::tokens(config).await,
        Commands::Vault => commands::vault(config).await,
        Commands::Pools { token } => commands::pools(config, token.as_deref()).await,
        Commands::Price { token } => commands::price(config, &token).await,
        Commands::Wait { txid, start_block } => commands::wait(config, &txid, start_block).await,
        Commands::Broadcast { hex, chain } => commands::broadcast(config, &hex, chain).await,
        Commands::Inspect { hex } => commands::inspect(&hex),
        Commands::SignAndSend { hex, force } => commands::sign_and_send(config, &hex, force).await,
    }
}
