//! In-memory chain for tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Mutex;

use super::types::{
    ActivePrice, AddressToken, ChainStats, CollateralToken, LoanToken, LoanVault, PoolPair,
    StatsCount, TokenInfo,
};
use super::{ChainQuery, ChainSubmit, TransactionInfo};
use crate::error::{Error, Result};
use crate::tx::{Script, SpendableOutput, Transaction, Txid};

#[derive(Default)]
struct MockState {
    utxos: Vec<SpendableOutput>,
    height: u64,
    /// Added to the height on every height query
    height_step: u64,
    /// Unknown transactions become visible from this height on
    confirm_at_height: Option<u64>,
    known: HashSet<Txid>,
    transient_failures: u32,
    reject: bool,
    query_down: bool,
    tokens: Vec<AddressToken>,
    vault: Option<LoanVault>,
    pools: Vec<PoolPair>,
    submitted: Vec<Transaction>,
    submit_calls: u32,
    utxo_queries: u32,
}

#[derive(Default)]
pub(crate) struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_utxos(self, utxos: Vec<SpendableOutput>) -> Self {
        self.state.lock().unwrap().utxos = utxos;
        self
    }

    pub fn with_height(self, height: u64, step: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.height = height;
            state.height_step = step;
        }
        self
    }

    pub fn with_tokens(self, tokens: Vec<AddressToken>) -> Self {
        self.state.lock().unwrap().tokens = tokens;
        self
    }

    pub fn with_vault(self, vault: LoanVault) -> Self {
        self.state.lock().unwrap().vault = Some(vault);
        self
    }

    pub fn with_pools(self, pools: Vec<PoolPair>) -> Self {
        self.state.lock().unwrap().pools = pools;
        self
    }

    pub fn confirm_at_height(self, height: u64) -> Self {
        self.state.lock().unwrap().confirm_at_height = Some(height);
        self
    }

    pub fn failing_submits(self, transient_failures: u32) -> Self {
        self.state.lock().unwrap().transient_failures = transient_failures;
        self
    }

    pub fn rejecting(self) -> Self {
        self.state.lock().unwrap().reject = true;
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().query_down = true;
        self
    }

    pub fn mark_known(&self, txid: Txid) {
        self.state.lock().unwrap().known.insert(txid);
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().unwrap().submit_calls
    }

    pub fn utxo_queries(&self) -> u32 {
        self.state.lock().unwrap().utxo_queries
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn get_spendable_outputs(&self, _address: &str, limit: usize) -> Result<Vec<SpendableOutput>> {
        let mut state = self.state.lock().unwrap();
        if state.query_down {
            return Err(Error::Query("connection refused".to_string()));
        }
        state.utxo_queries += 1;
        Ok(state.utxos.iter().take(limit).cloned().collect())
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionInfo>> {
        let state = self.state.lock().unwrap();
        if state.query_down {
            return Err(Error::Query("connection refused".to_string()));
        }
        let visible = state.known.contains(txid)
            || state
                .confirm_at_height
                .is_some_and(|height| state.height >= height);
        Ok(visible.then(|| TransactionInfo {
            txid: *txid,
            block_height: Some(state.height),
        }))
    }

    async fn get_block_height(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.query_down {
            return Err(Error::Query("connection refused".to_string()));
        }
        state.height += state.height_step;
        Ok(state.height)
    }

    async fn get_balance(&self, _address: &str) -> Result<Decimal> {
        let state = self.state.lock().unwrap();
        Ok(state.utxos.iter().map(|utxo| utxo.value).sum())
    }

    async fn get_token_balances(&self, _address: &str) -> Result<Vec<AddressToken>> {
        Ok(self.state.lock().unwrap().tokens.clone())
    }

    async fn get_vault(&self, vault_id: &Txid) -> Result<LoanVault> {
        self.state
            .lock()
            .unwrap()
            .vault
            .clone()
            .filter(|vault| vault.vault_id == *vault_id)
            .ok_or_else(|| Error::Query(format!("vault {} not found", vault_id)))
    }

    async fn get_pools(&self) -> Result<Vec<PoolPair>> {
        Ok(self.state.lock().unwrap().pools.clone())
    }

    async fn get_active_price(&self, _token: &str) -> Result<Option<ActivePrice>> {
        Ok(None)
    }

    async fn get_token(&self, id: &str) -> Result<TokenInfo> {
        Err(Error::Query(format!("token {} not found", id)))
    }

    async fn get_loan_token(&self, id: &str) -> Result<LoanToken> {
        Err(Error::Query(format!("loan token {} not found", id)))
    }

    async fn get_collateral_token(&self, id: &str) -> Result<CollateralToken> {
        Err(Error::Query(format!("collateral token {} not found", id)))
    }

    async fn get_stats(&self) -> Result<ChainStats> {
        let state = self.state.lock().unwrap();
        Ok(ChainStats {
            count: StatsCount {
                blocks: state.height,
                ..StatsCount::default()
            },
            ..ChainStats::default()
        })
    }
}

#[async_trait]
impl ChainSubmit for MockChain {
    async fn send_raw(&self, hex: &str) -> Result<Txid> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(Error::SubmitTransient("node busy".to_string()));
        }
        if state.reject {
            return Err(Error::SubmitRejected("bad-txns-in-belowout".to_string()));
        }
        let tx = Transaction::from_hex(hex)?;
        let txid = tx.txid()?;
        state.submitted.push(tx);
        Ok(txid)
    }
}

/// Native-asset output paying to `script`
pub(crate) fn utxo(n: u8, value: Decimal, script: &Script) -> SpendableOutput {
    SpendableOutput {
        txid: Txid::from_internal_bytes([n; 32]),
        vout: 0,
        value,
        script: script.clone(),
        token_id: 0,
    }
}
