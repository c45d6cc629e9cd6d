//! Configuration loading and validation

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::signing::{Network, SigningCapability};
use crate::tx::SelectionPolicy;

lazy_static! {
    /// 32-byte hash in display hex (vault ids, txids)
    pub static ref HASH_HEX: Regex = Regex::new(r"^[0-9a-fA-F]{64}$").unwrap();
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ocean: OceanConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Chain API endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OceanConfig {
    #[serde(default = "default_ocean_url")]
    pub url: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OceanConfig {
    fn default() -> Self {
        Self {
            url: default_ocean_url(),
            network: Network::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Operator wallet and managed vault
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub address: String,
    #[serde(default)]
    pub vault_id: String,
}

/// Transaction construction parameters
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fee per 1000 virtual bytes
    #[serde(default = "default_fee_rate_per_kb")]
    pub fee_rate_per_kb: Decimal,
    /// Minimum the selected inputs must cover on top of the payment
    #[serde(default = "default_min_fee_floor")]
    pub min_fee_floor: Decimal,
    /// Spendable outputs fetched per build
    #[serde(default = "default_utxo_limit")]
    pub utxo_limit: usize,
    /// Spendable outputs fetched when re-signing external transactions
    #[serde(default = "default_resign_utxo_limit")]
    pub resign_utxo_limit: usize,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate_per_kb: default_fee_rate_per_kb(),
            min_fee_floor: default_min_fee_floor(),
            utxo_limit: default_utxo_limit(),
            resign_utxo_limit: default_resign_utxo_limit(),
            selection_policy: SelectionPolicy::default(),
        }
    }
}

/// Broadcast retry parameters
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Retry budget, in retry intervals, measured from the first attempt
    #[serde(default = "default_max_retry_intervals")]
    pub max_retry_intervals: u32,
    /// Wait before the first attempt when spending a chained prevout
    #[serde(default = "default_chained_initial_delay_ms")]
    pub chained_initial_delay_ms: u64,
}

impl BroadcastConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn retry_budget(&self) -> Duration {
        self.retry_interval() * self.max_retry_intervals
    }

    pub fn chained_initial_delay(&self) -> Duration {
        Duration::from_millis(self.chained_initial_delay_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_intervals: default_max_retry_intervals(),
            chained_initial_delay_ms: default_chained_initial_delay_ms(),
        }
    }
}

/// Inclusion polling parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Budget when this session signs its own transactions
    #[serde(default = "default_self_signed_minutes")]
    pub self_signed_minutes: u64,
    #[serde(default = "default_self_signed_blocks")]
    pub self_signed_blocks: u64,
    /// Budget when the transaction is signed elsewhere first
    #[serde(default = "default_external_minutes")]
    pub external_minutes: u64,
    #[serde(default = "default_external_blocks")]
    pub external_blocks: u64,
}

/// How long to wait for a transaction before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub time: Duration,
    pub blocks: u64,
}

impl ConfirmationConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Externally signed transactions get the looser budget: an extra
    /// signing round-trip happens before they even reach the network.
    pub fn budget_for(&self, capability: &SigningCapability) -> WaitBudget {
        match capability {
            SigningCapability::WithOwnership { .. } => WaitBudget {
                time: Duration::from_secs(self.self_signed_minutes * 60),
                blocks: self.self_signed_blocks,
            },
            SigningCapability::WithoutOwnership { .. } | SigningCapability::Unavailable { .. } => {
                WaitBudget {
                    time: Duration::from_secs(self.external_minutes * 60),
                    blocks: self.external_blocks,
                }
            }
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_poll_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            self_signed_minutes: default_self_signed_minutes(),
            self_signed_blocks: default_self_signed_blocks(),
            external_minutes: default_external_minutes(),
            external_blocks: default_external_blocks(),
        }
    }
}

/// Operator notifications
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }
}

fn default_ocean_url() -> String {
    "https://ocean.defichain.com".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_fee_rate_per_kb() -> Decimal {
    Decimal::new(1, 5) // 0.00001
}

fn default_min_fee_floor() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_utxo_limit() -> usize {
    10
}

fn default_resign_utxo_limit() -> usize {
    100
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

fn default_max_retry_intervals() -> u32 {
    5
}

fn default_chained_initial_delay_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_self_signed_minutes() -> u64 {
    10
}

fn default_self_signed_blocks() -> u64 {
    20
}

fn default_external_minutes() -> u64 {
    15
}

fn default_external_blocks() -> u64 {
    30
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("ocean.url", default_ocean_url())?
            .set_default("ocean.network", "mainnet")?
            .set_default("ocean.timeout_ms", default_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix VAULT_)
            .add_source(
                config::Environment::with_prefix("VAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.ocean.url)
            .with_context(|| format!("Invalid ocean.url: {}", self.ocean.url))?;

        if self.wallet.address.trim().is_empty() {
            anyhow::bail!("wallet.address must be set");
        }

        if !self.wallet.vault_id.is_empty() && !HASH_HEX.is_match(&self.wallet.vault_id) {
            anyhow::bail!("wallet.vault_id must be 64 hex characters");
        }

        if self.engine.fee_rate_per_kb <= Decimal::ZERO {
            anyhow::bail!("engine.fee_rate_per_kb must be positive");
        }

        if self.engine.min_fee_floor.is_sign_negative() {
            anyhow::bail!("engine.min_fee_floor cannot be negative");
        }

        if self.engine.utxo_limit == 0 || self.engine.resign_utxo_limit == 0 {
            anyhow::bail!("engine utxo limits must be at least 1");
        }

        if self.broadcast.retry_interval_ms == 0 {
            anyhow::bail!("broadcast.retry_interval_ms must be positive");
        }

        if self.confirmation.poll_interval_ms == 0 {
            anyhow::bail!("confirmation.poll_interval_ms must be positive");
        }

        if self.telegram.token.is_empty() != self.telegram.chat_id.is_empty() {
            tracing::warn!("Telegram needs both token and chat_id - notifications go to the log only");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Ocean:
    url: {}
    network: {}
    timeout: {}ms
  Wallet:
    address: {}
    vault: {}
  Engine:
    fee_rate: {} per kB
    min_fee_floor: {}
    utxo_limit: {}
    selection: {:?}
  Broadcast:
    retry_interval: {}ms
    retry_budget: {} intervals
    chained_delay: {}ms
  Confirmation:
    poll_interval: {}ms
    self-signed budget: {} min / {} blocks
    external budget: {} min / {} blocks
  Telegram:
    token: {}
    chat_id: {}
"#,
            mask_url(&self.ocean.url),
            self.ocean.network,
            self.ocean.timeout_ms,
            self.wallet.address,
            if self.wallet.vault_id.is_empty() {
                "(not set)"
            } else {
                &self.wallet.vault_id
            },
            self.engine.fee_rate_per_kb,
            self.engine.min_fee_floor,
            self.engine.utxo_limit,
            self.engine.selection_policy,
            self.broadcast.retry_interval_ms,
            self.broadcast.max_retry_intervals,
            self.broadcast.chained_initial_delay_ms,
            self.confirmation.poll_interval_ms,
            self.confirmation.self_signed_minutes,
            self.confirmation.self_signed_blocks,
            self.confirmation.external_minutes,
            self.confirmation.external_blocks,
            if self.telegram.token.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            if self.telegram.chat_id.is_empty() {
                "(not set)"
            } else {
                &self.telegram.chat_id
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Script;
    use std::io::Write;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.fee_rate_per_kb, Decimal::new(1, 5));
        assert_eq!(engine.min_fee_floor, Decimal::new(1, 3));
        assert_eq!(engine.utxo_limit, 10);
        assert_eq!(engine.resign_utxo_limit, 100);
        assert_eq!(engine.selection_policy, SelectionPolicy::All);
    }

    #[test]
    fn test_broadcast_budget() {
        let broadcast = BroadcastConfig::default();
        assert_eq!(broadcast.retry_interval(), Duration::from_secs(10));
        assert_eq!(broadcast.retry_budget(), Duration::from_secs(50));
        assert_eq!(broadcast.chained_initial_delay(), Duration::from_millis(3000));
    }

    #[test]
    fn test_budget_depends_on_capability() {
        let confirmation = ConfirmationConfig::default();
        let script = Script::new(vec![0x00]);

        let own = confirmation.budget_for(&SigningCapability::WithOwnership {
            script: script.clone(),
        });
        assert_eq!(own.time, Duration::from_secs(600));
        assert_eq!(own.blocks, 20);

        let external = confirmation.budget_for(&SigningCapability::WithoutOwnership { script });
        assert_eq!(external.time, Duration::from_secs(900));
        assert_eq!(external.blocks, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[ocean]
url = "http://localhost:3000"
network = "regtest"

[wallet]
address = "bcrt1qexample"

[engine]
utxo_limit = 25
selection_policy = "covering"

[broadcast]
retry_interval_ms = 2000
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.ocean.network, Network::Regtest);
        assert_eq!(config.ocean.url, "http://localhost:3000");
        assert_eq!(config.wallet.address, "bcrt1qexample");
        assert_eq!(config.engine.utxo_limit, 25);
        assert_eq!(config.engine.selection_policy, SelectionPolicy::Covering);
        assert_eq!(config.broadcast.retry_interval_ms, 2000);
        assert_eq!(config.broadcast.max_retry_intervals, 5);
        assert_eq!(config.confirmation.self_signed_blocks, 20);
        assert!(!config.telegram.is_configured());
    }

    #[test]
    fn test_rejects_bad_vault_id() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[wallet]
address = "df1qexample"
vault_id = "not-a-hash"
"#
        )
        .unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://ocean.example.com?key=secret"),
            "https://ocean.example.com?***"
        );
        assert_eq!(mask_url("https://ocean.example.com"), "https://ocean.example.com");
    }
}
