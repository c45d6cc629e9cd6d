//! Ledger state as reported by the indexer
//!
//! Field names follow the Ocean JSON (camelCase); amounts arrive as
//! decimal strings and are kept as `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::tx::Txid;

fn parse_token_id(id: &str) -> Result<u32> {
    id.parse()
        .map_err(|_| Error::Serialization(format!("token id is not numeric: {}", id)))
}

/// Token held in an address's account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressToken {
    pub id: String,
    pub amount: Decimal,
    pub symbol: String,
    pub display_symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "isDAT", default)]
    pub is_dat: bool,
    #[serde(rename = "isLPS", default)]
    pub is_lps: bool,
    #[serde(default)]
    pub is_loan_token: bool,
}

impl AddressToken {
    /// Numeric id, as operation payloads expect it
    pub fn token_id(&self) -> Result<u32> {
        parse_token_id(&self.id)
    }
}

/// Lifecycle state of a loan vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultState {
    Active,
    Frozen,
    MayLiquidate,
    InLiquidation,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            VaultState::Active => "active",
            VaultState::Frozen => "frozen",
            VaultState::MayLiquidate => "may liquidate",
            VaultState::InLiquidation => "in liquidation",
            VaultState::Unknown => "unknown",
        };
        write!(f, "{}", state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanScheme {
    pub id: String,
    pub min_col_ratio: Decimal,
    pub interest_rate: Decimal,
}

/// Collateral, loan or interest position inside a vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultTokenAmount {
    pub id: String,
    pub amount: Decimal,
    pub symbol: String,
    pub display_symbol: String,
    #[serde(default)]
    pub active_price: Option<ActivePrice>,
}

impl VaultTokenAmount {
    pub fn token_id(&self) -> Result<u32> {
        parse_token_id(&self.id)
    }
}

/// Loan vault, active or liquidated
///
/// A liquidated vault reports no ratios or amounts; those fields stay
/// empty and `liquidation_height` is set instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanVault {
    pub vault_id: Txid,
    pub loan_scheme: LoanScheme,
    pub owner_address: String,
    pub state: VaultState,

    // Ratios in percent; -1 when the vault has no loans
    #[serde(default)]
    pub informative_ratio: Option<Decimal>,
    #[serde(default)]
    pub collateral_ratio: Option<Decimal>,

    // USD values
    #[serde(default)]
    pub collateral_value: Option<Decimal>,
    #[serde(default)]
    pub loan_value: Option<Decimal>,
    #[serde(default)]
    pub interest_value: Option<Decimal>,

    #[serde(default)]
    pub collateral_amounts: Vec<VaultTokenAmount>,
    #[serde(default)]
    pub loan_amounts: Vec<VaultTokenAmount>,
    #[serde(default)]
    pub interest_amounts: Vec<VaultTokenAmount>,

    #[serde(default)]
    pub liquidation_height: Option<u64>,
}

impl LoanVault {
    pub fn is_active(&self) -> bool {
        self.state == VaultState::Active
    }

    /// Outstanding loan of `symbol`, zero if none
    pub fn loan_of(&self, symbol: &str) -> Decimal {
        amount_of(&self.loan_amounts, symbol)
    }

    /// Deposited collateral of `symbol`, zero if none
    pub fn collateral_of(&self, symbol: &str) -> Decimal {
        amount_of(&self.collateral_amounts, symbol)
    }
}

fn amount_of(amounts: &[VaultTokenAmount], symbol: &str) -> Decimal {
    amounts
        .iter()
        .find(|a| a.symbol == symbol)
        .map(|a| a.amount)
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolToken {
    pub id: String,
    pub symbol: String,
    pub display_symbol: String,
    pub reserve: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRatio {
    pub ab: Decimal,
    pub ba: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLiquidity {
    pub token: Decimal,
    #[serde(default)]
    pub usd: Option<Decimal>,
}

/// Liquidity pool pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolPair {
    pub id: String,
    pub symbol: String,
    pub display_symbol: String,
    #[serde(default)]
    pub name: String,
    pub status: bool,
    pub token_a: PoolToken,
    pub token_b: PoolToken,
    pub price_ratio: PriceRatio,
    pub commission: Decimal,
    pub total_liquidity: PoolLiquidity,
    pub trade_enabled: bool,
}

impl PoolPair {
    pub fn pool_id(&self) -> Result<u32> {
        parse_token_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBlock {
    pub height: u64,
}

/// Fixed-interval oracle price of a token in USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePrice {
    #[serde(default)]
    pub key: String,
    pub is_live: bool,
    pub block: PriceBlock,
    #[serde(default)]
    pub active: Option<OraclePrice>,
    #[serde(default)]
    pub next: Option<OraclePrice>,
}

/// Token definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    pub symbol: String,
    pub display_symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub decimal: u32,
    #[serde(rename = "isDAT", default)]
    pub is_dat: bool,
    #[serde(rename = "isLPS", default)]
    pub is_lps: bool,
    #[serde(default)]
    pub is_loan_token: bool,
    #[serde(default)]
    pub mintable: bool,
    #[serde(default)]
    pub tradeable: bool,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default)]
    pub minted: Decimal,
}

/// Token that can be borrowed from a vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanToken {
    pub token_id: String,
    pub token: TokenInfo,
    pub interest: Decimal,
    pub fixed_interval_price_id: String,
    #[serde(default)]
    pub active_price: Option<ActivePrice>,
}

/// Token accepted as vault collateral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralToken {
    pub token_id: String,
    pub token: TokenInfo,
    pub factor: Decimal,
    #[serde(default)]
    pub activate_after_block: u64,
    pub fixed_interval_price_id: String,
    #[serde(default)]
    pub active_price: Option<ActivePrice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsCount {
    pub blocks: u64,
    #[serde(default)]
    pub prices: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub masternodes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalValueLocked {
    pub total: Decimal,
    #[serde(default)]
    pub dex: Decimal,
    #[serde(default)]
    pub loan: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsdPrice {
    pub usd: Decimal,
}

/// Network-wide counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub count: StatsCount,
    #[serde(default)]
    pub tvl: Option<TotalValueLocked>,
    #[serde(default)]
    pub price: Option<UsdPrice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_vault() {
        let vault: LoanVault = serde_json::from_str(
            r#"{
                "vaultId": "c0ffee0000000000000000000000000000000000000000000000000000000001",
                "loanScheme": { "id": "MIN150", "minColRatio": "150", "interestRate": "5" },
                "ownerAddress": "df1qowner",
                "state": "ACTIVE",
                "informativeRatio": "212.5",
                "collateralRatio": "212",
                "collateralValue": "4250",
                "loanValue": "2000",
                "interestValue": "0.12",
                "collateralAmounts": [
                    { "id": "0", "amount": "1000.00000000", "symbol": "DFI", "symbolKey": "DFI", "name": "Default Defi token", "displaySymbol": "DFI" }
                ],
                "loanAmounts": [
                    { "id": "15", "amount": "2000.12000000", "symbol": "DUSD", "symbolKey": "DUSD", "name": "Decentralized USD", "displaySymbol": "DUSD" }
                ],
                "interestAmounts": []
            }"#,
        )
        .unwrap();

        assert!(vault.is_active());
        assert_eq!(vault.loan_scheme.min_col_ratio, Decimal::from(150));
        assert_eq!(vault.collateral_ratio, Some(Decimal::from(212)));
        assert_eq!(vault.loan_of("DUSD"), Decimal::new(200_012, 2));
        assert_eq!(vault.collateral_of("DFI"), Decimal::from(1000));
        assert_eq!(vault.loan_of("TSLA"), Decimal::ZERO);
        assert_eq!(vault.loan_amounts[0].token_id().unwrap(), 15);
    }

    #[test]
    fn test_liquidated_vault() {
        let vault: LoanVault = serde_json::from_str(
            r#"{
                "vaultId": "c0ffee0000000000000000000000000000000000000000000000000000000001",
                "loanScheme": { "id": "MIN150", "minColRatio": "150", "interestRate": "5" },
                "ownerAddress": "df1qowner",
                "state": "IN_LIQUIDATION",
                "liquidationHeight": 1500000,
                "liquidationPenalty": 5,
                "batchCount": 2,
                "batches": []
            }"#,
        )
        .unwrap();

        assert_eq!(vault.state, VaultState::InLiquidation);
        assert!(!vault.is_active());
        assert_eq!(vault.liquidation_height, Some(1_500_000));
        assert!(vault.collateral_amounts.is_empty());
        assert_eq!(vault.collateral_ratio, None);
    }

    #[test]
    fn test_unknown_vault_state() {
        let state: VaultState = serde_json::from_str(r#""SOMETHING_NEW""#).unwrap();
        assert_eq!(state, VaultState::Unknown);
        let state: VaultState = serde_json::from_str(r#""MAY_LIQUIDATE""#).unwrap();
        assert_eq!(state, VaultState::MayLiquidate);
    }

    #[test]
    fn test_loan_token_with_price() {
        let loan: LoanToken = serde_json::from_str(
            r#"{
                "tokenId": "abc",
                "token": {
                    "id": "15", "symbol": "DUSD", "symbolKey": "DUSD", "displaySymbol": "DUSD",
                    "name": "Decentralized USD", "decimal": 8, "limit": "0",
                    "mintable": true, "tradeable": true, "isDAT": true, "isLPS": false,
                    "isLoanToken": true, "finalized": false, "minted": "1000000.5",
                    "creation": { "tx": "x", "height": 1 }, "destruction": { "tx": "y", "height": -1 }
                },
                "interest": "0",
                "fixedIntervalPriceId": "DUSD/USD",
                "activePrice": {
                    "id": "DUSD-USD-1000", "key": "DUSD-USD", "sort": "s", "isLive": true,
                    "block": { "hash": "h", "height": 1000, "medianTime": 1, "time": 2 },
                    "active": { "amount": "1.00000000", "weightage": 30, "oracles": { "active": 3, "total": 3 } },
                    "next": { "amount": "0.99000000", "weightage": 30, "oracles": { "active": 3, "total": 3 } }
                }
            }"#,
        )
        .unwrap();

        assert!(loan.token.is_dat && loan.token.is_loan_token);
        assert_eq!(loan.token.minted, Decimal::new(10_000_005, 1));
        let price = loan.active_price.unwrap();
        assert!(price.is_live);
        assert_eq!(price.next.unwrap().amount, Decimal::new(99, 2));
    }
}
