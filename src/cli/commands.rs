//! CLI command implementations

use anyhow::Result;
use chrono::Utc;
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::chain::types::OraclePrice;
use crate::chain::{ChainQuery, OceanClient};
use crate::config::Config;
use crate::dftx::{describe, DfTx};
use crate::notify;
use crate::program::CustodyProgram;
use crate::signing::WatchOnlyProvider;
use crate::tx::{Transaction, Txid};

/// Program against the configured Ocean endpoint
///
/// The binary carries no key material, so the wallet resolves to
/// watch-only at best.
async fn open_program(config: &Config) -> Result<CustodyProgram> {
    let chain = Arc::new(OceanClient::new(&config.ocean)?);
    let signer = Arc::new(WatchOnlyProvider::new(config.ocean.network));
    let notifier = notify::from_config(&config.telegram)?;

    let mut program = CustodyProgram::new(config, chain, signer, notifier)?;
    program.init().await;
    Ok(program)
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check chain endpoint, wallet and notifications
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let program = open_program(config).await?;

    print!("Ocean API... ");
    let start = Instant::now();
    match program.block_height().await {
        Ok(height) => println!(
            "OK (height {}, {}ms)",
            height,
            start.elapsed().as_millis()
        ),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Wallet... ");
    if program.validate(false).await {
        println!("OK ({})", program.capability());
    } else {
        println!("FAILED: {}", program.capability());
        all_healthy = false;
    }

    if config.telegram.is_configured() {
        println!("Telegram... CONFIGURED");
    } else {
        println!("Telegram... DISABLED (log only)");
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

/// Show the native balance of the configured address
pub async fn balance(config: &Config) -> Result<()> {
    let program = open_program(config).await?;
    let balance = program.balance().await?;
    println!("{}: {} DFI", program.address(), balance);
    Ok(())
}

/// List spendable outputs of the configured address
pub async fn utxos(config: &Config, limit: usize) -> Result<()> {
    let chain = OceanClient::new(&config.ocean)?;
    let outputs = chain
        .get_spendable_outputs(&config.wallet.address, limit)
        .await?;

    println!("\n=== SPENDABLE OUTPUTS ({}) ===\n", outputs.len());
    for output in &outputs {
        println!(
            "{}:{}  {:>16}  token {}",
            output.txid, output.vout, output.value, output.token_id
        );
    }
    let total: rust_decimal::Decimal = outputs.iter().map(|o| o.value).sum();
    println!("\nTotal: {}", total);
    Ok(())
}

/// Show the current block height
pub async fn height(config: &Config) -> Result<()> {
    let chain = OceanClient::new(&config.ocean)?;
    println!("{}", chain.get_block_height().await?);
    Ok(())
}

/// Show account token balances of the configured address
pub async fn tokens(config: &Config) -> Result<()> {
    let program = open_program(config).await?;
    let mut balances: Vec<_> = program.token_balances().await?.into_values().collect();
    balances.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    println!("\n=== TOKENS ({}) ===\n", program.address());
    for token in &balances {
        let kind = if token.is_lps { "LP" } else { "" };
        println!("{:>4}  {:<16} {:>20} {}", token.id, token.display_symbol, token.amount, kind);
    }
    if balances.is_empty() {
        println!("No tokens");
    }
    Ok(())
}

/// Show the configured vault
pub async fn vault(config: &Config) -> Result<()> {
    let program = open_program(config).await?;
    let vault = program.vault().await?;

    println!("\n=== VAULT {} ===\n", vault.vault_id);
    println!("State:        {}", vault.state);
    println!(
        "Scheme:       {} (min ratio {}%, interest {}%)",
        vault.loan_scheme.id, vault.loan_scheme.min_col_ratio, vault.loan_scheme.interest_rate
    );
    if let Some(height) = vault.liquidation_height {
        println!("Liquidation:  at height {}", height);
    }
    if let (Some(ratio), Some(next)) = (vault.collateral_ratio, vault.informative_ratio) {
        println!("Ratio:        {}% (next {}%)", ratio, next);
    }
    if let (Some(collateral), Some(loan)) = (vault.collateral_value, vault.loan_value) {
        println!("Value:        {} USD collateral, {} USD loans", collateral, loan);
    }

    println!("\nCollateral:");
    for amount in &vault.collateral_amounts {
        println!("  {:<10} {:>20}", amount.display_symbol, amount.amount);
    }
    println!("\nLoans:");
    for amount in &vault.loan_amounts {
        println!("  {:<10} {:>20}", amount.display_symbol, amount.amount);
    }

    if !vault.is_active() {
        warn!("Vault is {}; operations on it may be refused", vault.state);
    }
    Ok(())
}

/// List liquidity pools, optionally only those holding `token`
pub async fn pools(config: &Config, token: Option<&str>) -> Result<()> {
    let chain = OceanClient::new(&config.ocean)?;
    let pools: Vec<_> = chain
        .get_pools()
        .await?
        .into_iter()
        .filter(|pool| {
            token.map_or(true, |symbol| {
                pool.token_a.symbol == symbol || pool.token_b.symbol == symbol
            })
        })
        .collect();

    println!("\n=== POOLS ({}) ===\n", pools.len());
    for pool in &pools {
        println!(
            "{:>4}  {:<16} {:>20} {:>20}{}",
            pool.id,
            pool.symbol,
            pool.token_a.reserve,
            pool.token_b.reserve,
            if pool.trade_enabled { "" } else { "  (trading disabled)" }
        );
    }
    Ok(())
}

/// Show the fixed-interval USD price of `token`
pub async fn price(config: &Config, token: &str) -> Result<()> {
    let chain = OceanClient::new(&config.ocean)?;
    let Some(price) = chain.get_active_price(token).await? else {
        anyhow::bail!("No price feed for {}", token);
    };

    let amount = |p: Option<&OraclePrice>| p.map_or("-".to_string(), |p| p.amount.to_string());
    println!(
        "{} at block {}: active {} next {}{}",
        token,
        price.block.height,
        amount(price.active.as_ref()),
        amount(price.next.as_ref()),
        if price.is_live { "" } else { " (not live)" }
    );
    Ok(())
}

/// Wait for a transaction to become visible
pub async fn wait(config: &Config, txid: &str, start_block: Option<u64>) -> Result<()> {
    let txid: Txid = txid.parse()?;
    let program = open_program(config).await?;

    if program.wait_for_tx(&txid, start_block).await {
        println!("{} found at {}", txid, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
        Ok(())
    } else {
        anyhow::bail!("{} not found within the wait budget", txid)
    }
}

/// Send already-signed transactions
///
/// With `chain`, every transaction after the first is moved onto the
/// change of the one sent before it, which needs a key.
pub async fn broadcast(config: &Config, raw_txs: &[String], chain: bool) -> Result<()> {
    let txs = raw_txs
        .iter()
        .map(|raw| Transaction::from_hex(raw))
        .collect::<crate::Result<Vec<_>>>()?;

    let program = open_program(config).await?;
    for txid in program.broadcast_all(txs, chain).await? {
        println!("Sent: {}", txid);
    }
    Ok(())
}

/// Decode a raw transaction and show what it does
pub fn inspect(raw: &str) -> Result<()> {
    let tx = Transaction::from_hex(raw)?;

    println!("\n=== TRANSACTION {} ===\n", tx.txid()?);
    println!("Version: {}  Lock time: {}", tx.version, tx.lock_time);
    println!("Signed: {}", if tx.has_witness() { "yes" } else { "no" });

    println!("\nInputs ({}):", tx.inputs.len());
    for input in &tx.inputs {
        println!("  {}:{}", input.txid, input.vout);
    }

    println!("\nOutputs ({}):", tx.outputs.len());
    for (i, output) in tx.outputs.iter().enumerate() {
        match describe(&output.script) {
            Some(kind) => println!("  #{} {} {}", i, output.value, kind),
            None => println!(
                "  #{} {} -> {} (token {})",
                i,
                output.value,
                output.script.to_hex(),
                output.token_id
            ),
        }
    }

    if let Some(data) = tx.outputs.first().and_then(|o| o.script.op_return_data()) {
        match DfTx::decode(data) {
            Ok(dftx) => println!("\nOperation: {:#?}", dftx),
            Err(e) => warn!("Data output not understood: {}", e),
        }
    }

    Ok(())
}

/// Sign and send externally built transactions
pub async fn sign_and_send(config: &Config, raw_txs: &[String], force: bool) -> Result<()> {
    let program = open_program(config).await?;
    if !program.validate(true).await {
        anyhow::bail!("Wallet cannot sign for {}", program.address());
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Sign and send {} transaction(s) from {}? This cannot be undone.",
                raw_txs.len(),
                program.address()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Sign-and-send cancelled by user");
            return Ok(());
        }
    }

    match program.sign_and_send_raw(raw_txs).await {
        Ok(txids) => {
            for txid in txids {
                println!("Sent: {}", txid);
            }
            Ok(())
        }
        Err(e) => {
            error!("Sign-and-send failed: {}", e);
            Err(e.into())
        }
    }
}
