//! Chain collaborators
//!
//! The engine only talks to the network through these traits:
//! - `ChainQuery` - spendable outputs, transaction lookup, height, balance,
//!   plus token, vault, pool and price state
//! - `ChainSubmit` - raw transaction submission
//!
//! `ocean` provides an HTTP implementation of both.

pub mod ocean;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use ocean::OceanClient;
pub use types::{
    ActivePrice, AddressToken, ChainStats, CollateralToken, LoanToken, LoanVault, PoolPair,
    TokenInfo, VaultState,
};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::tx::{SpendableOutput, Txid};

/// A transaction known to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub txid: Txid,
    /// Height of the including block
    pub block_height: Option<u64>,
}

/// Read access to the chain
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Up to `limit` unspent outputs of `address`
    async fn get_spendable_outputs(&self, address: &str, limit: usize) -> Result<Vec<SpendableOutput>>;

    /// `None` when the transaction is not (yet) known
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionInfo>>;

    async fn get_block_height(&self) -> Result<u64>;

    /// Native-asset balance of `address`
    async fn get_balance(&self, address: &str) -> Result<Decimal>;

    /// Account token balances of `address`
    async fn get_token_balances(&self, address: &str) -> Result<Vec<AddressToken>>;

    async fn get_vault(&self, vault_id: &Txid) -> Result<LoanVault>;

    async fn get_pools(&self) -> Result<Vec<PoolPair>>;

    /// Latest fixed-interval USD price of `token`, `None` before the first one
    async fn get_active_price(&self, token: &str) -> Result<Option<ActivePrice>>;

    async fn get_token(&self, id: &str) -> Result<TokenInfo>;

    async fn get_loan_token(&self, id: &str) -> Result<LoanToken>;

    async fn get_collateral_token(&self, id: &str) -> Result<CollateralToken>;

    async fn get_stats(&self) -> Result<ChainStats>;
}

/// Raw transaction submission
///
/// Implementations report `Error::SubmitTransient` for failures worth
/// retrying and `Error::SubmitRejected` for definitive rejections.
#[async_trait]
pub trait ChainSubmit: Send + Sync {
    async fn send_raw(&self, hex: &str) -> Result<Txid>;
}
