//! Ocean REST API client
//!
//! Implements chain queries and raw transaction submission against an
//! Ocean-style indexer (`/v0/{network}/...`). Every response is wrapped
//! in `{ "data": ... }`, lists add `{ "page": { "next": ... } }` while more
//! items remain; failures come back as `{ "error": { ... } }`.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{
    ActivePrice, AddressToken, ChainStats, CollateralToken, LoanToken, LoanVault, PoolPair,
    TokenInfo,
};
use super::{ChainQuery, ChainSubmit, TransactionInfo};
use crate::config::OceanConfig;
use crate::error::{Error, Result};
use crate::tx::{Script, SpendableOutput, Txid};

/// Ocean page size limit
const MAX_PAGE_SIZE: usize = 200;

/// Upper bound for token and pool listings
const LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    page: Option<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    next: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UnspentScript {
    hex: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnspentVout {
    txid: String,
    n: u32,
    value: Decimal,
    #[serde(default)]
    token_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Unspent {
    script: UnspentScript,
    vout: UnspentVout,
}

impl Unspent {
    fn into_output(self) -> Result<SpendableOutput> {
        Ok(SpendableOutput {
            txid: self.vout.txid.parse()?,
            vout: self.vout.n,
            value: self.vout.value,
            script: Script::from_hex(&self.script.hex)?,
            token_id: self.vout.token_id.unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TransactionBlock {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    txid: String,
    #[serde(default)]
    block: Option<TransactionBlock>,
}

#[derive(Debug, Serialize)]
struct RawTxRequest<'a> {
    hex: &'a str,
}

/// Client for an Ocean REST endpoint
#[derive(Debug, Clone)]
pub struct OceanClient {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl OceanClient {
    pub fn new(config: &OceanConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/v0/{}",
                config.url.trim_end_matches('/'),
                config.network
            ),
            timeout_ms: config.timeout_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Envelope<T>> {
        let url = self.url(path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        Self::parse(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.fetch(path, &[]).await?.data)
    }

    /// Up to `limit` items of a paged listing, following `page.next`
    async fn list<T: DeserializeOwned>(&self, path: &str, limit: usize) -> Result<Vec<T>> {
        let mut items: Vec<T> = Vec::new();
        let mut next: Option<String> = None;

        while items.len() < limit {
            let size = (limit - items.len()).min(MAX_PAGE_SIZE);
            let mut query = vec![("size", size.to_string())];
            if let Some(cursor) = next.take() {
                query.push(("next", cursor));
            }

            let envelope: Envelope<Vec<T>> = self.fetch(path, &query).await?;
            let fetched = envelope.data.len();
            items.extend(envelope.data);
            match envelope.page {
                Some(page) if fetched > 0 => next = Some(page.next),
                _ => break,
            }
        }

        items.truncate(limit);
        Ok(items)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Query(format!(
                "Ocean API error {}: {}",
                status,
                error_message(&body)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse Ocean response: {}", e)))
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::QueryTimeout(self.timeout_ms)
        } else {
            Error::Query(format!("Ocean request failed: {}", e))
        }
    }
}

#[async_trait]
impl ChainQuery for OceanClient {
    async fn get_spendable_outputs(&self, address: &str, limit: usize) -> Result<Vec<SpendableOutput>> {
        let unspent: Vec<Unspent> = self
            .list(&format!("/address/{}/transactions/unspent", address), limit)
            .await?;

        unspent.into_iter().map(Unspent::into_output).collect()
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionInfo>> {
        let url = self.url(&format!("/transactions/{}", txid));
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data: TransactionData = Self::parse(response).await?.data;
        Ok(Some(TransactionInfo {
            txid: data.txid.parse()?,
            block_height: data.block.map(|block| block.height),
        }))
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(self.get_stats().await?.count.blocks)
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        self.get(&format!("/address/{}/balance", address)).await
    }

    async fn get_token_balances(&self, address: &str) -> Result<Vec<AddressToken>> {
        self.list(&format!("/address/{}/tokens", address), LIST_LIMIT)
            .await
    }

    async fn get_vault(&self, vault_id: &Txid) -> Result<LoanVault> {
        self.get(&format!("/loans/vaults/{}", vault_id)).await
    }

    async fn get_pools(&self) -> Result<Vec<PoolPair>> {
        self.list("/poolpairs", LIST_LIMIT).await
    }

    async fn get_active_price(&self, token: &str) -> Result<Option<ActivePrice>> {
        let feed: Vec<ActivePrice> = self
            .list(&format!("/prices/{}-USD/feed/active", token), 1)
            .await?;
        Ok(feed.into_iter().next())
    }

    async fn get_token(&self, id: &str) -> Result<TokenInfo> {
        self.get(&format!("/tokens/{}", id)).await
    }

    async fn get_loan_token(&self, id: &str) -> Result<LoanToken> {
        self.get(&format!("/loans/tokens/{}", id)).await
    }

    async fn get_collateral_token(&self, id: &str) -> Result<CollateralToken> {
        self.get(&format!("/loans/collaterals/{}", id)).await
    }

    async fn get_stats(&self) -> Result<ChainStats> {
        self.get("/stats").await
    }
}

#[async_trait]
impl ChainSubmit for OceanClient {
    async fn send_raw(&self, hex: &str) -> Result<Txid> {
        let url = self.url("/rawtx/send");
        debug!("POST {} ({} bytes)", url, hex.len() / 2);

        let response = self
            .client
            .post(&url)
            .json(&RawTxRequest { hex })
            .send()
            .await
            .map_err(|e| Error::SubmitTransient(format!("Ocean request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_submit_error(status, &error_message(&body)));
        }

        let envelope: Envelope<String> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse Ocean response: {}", e)))?;
        envelope.data.parse()
    }
}

/// Pull the message out of an Ocean error body, or return the body as is
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// Split submission failures into retryable and final
///
/// A freshly chained input may not have propagated to the node yet, which
/// surfaces as a "missing inputs" rejection; that one is worth retrying.
pub(crate) fn classify_submit_error(status: StatusCode, message: &str) -> Error {
    let detail = format!("{}: {}", status, message);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::SubmitTransient(detail)
    } else if status == StatusCode::BAD_REQUEST && message.to_lowercase().contains("missing") {
        Error::SubmitTransient(detail)
    } else {
        Error::SubmitRejected(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::Network;

    fn client() -> OceanClient {
        OceanClient::new(&OceanConfig {
            url: "https://ocean.example.com/".to_string(),
            network: Network::Testnet,
            timeout_ms: 5000,
        })
        .unwrap()
    }

    #[test]
    fn test_url_includes_network() {
        assert_eq!(
            client().url("/stats"),
            "https://ocean.example.com/v0/testnet/stats"
        );
    }

    #[test]
    fn test_parse_unspent() {
        let body = r#"{
            "data": [{
                "id": "x",
                "hid": "y",
                "sort": "z",
                "script": { "type": "witness_v0_keyhash", "hex": "0014aabbccddeeff00112233445566778899aabbccdd" },
                "vout": {
                    "txid": "9d2f31cce0cefbe4f8ab7b0a02bd2f44ee8d56ca0e1e4bbb7ed5d7d9da9ba6b2",
                    "n": 1,
                    "value": "12.34567890",
                    "tokenId": 0
                }
            }],
            "page": { "next": "abc" }
        }"#;

        let envelope: Envelope<Vec<Unspent>> = serde_json::from_str(body).unwrap();
        let outputs: Vec<SpendableOutput> = envelope
            .data
            .into_iter()
            .map(|u| u.into_output().unwrap())
            .collect();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].vout, 1);
        assert_eq!(outputs[0].value, Decimal::new(1_234_567_890, 8));
        assert_eq!(outputs[0].script.len(), 22);
        assert_eq!(
            outputs[0].txid.to_string(),
            "9d2f31cce0cefbe4f8ab7b0a02bd2f44ee8d56ca0e1e4bbb7ed5d7d9da9ba6b2"
        );
    }

    #[test]
    fn test_parse_stats_and_transaction() {
        let stats: Envelope<ChainStats> =
            serde_json::from_str(r#"{"data":{"count":{"blocks":1234567,"prices":10}}}"#).unwrap();
        assert_eq!(stats.data.count.blocks, 1_234_567);
        assert_eq!(stats.data.tvl, None);

        let tx: Envelope<TransactionData> = serde_json::from_str(
            r#"{"data":{"id":"a","txid":"00000000000000000000000000000000000000000000000000000000000000ff","block":{"hash":"h","height":99}}}"#,
        )
        .unwrap();
        assert_eq!(tx.data.block.unwrap().height, 99);
    }

    #[test]
    fn test_parse_token_balances() {
        let body = r#"{
            "data": [
                { "id": "0", "amount": "12.50000000", "symbol": "DFI", "symbolKey": "DFI", "name": "Default Defi token", "isDAT": true, "isLPS": false, "isLoanToken": false, "displaySymbol": "DFI" },
                { "id": "17", "amount": "3.14000000", "symbol": "DUSD-DFI", "symbolKey": "DUSD-DFI", "name": "Decentralized USD-Default Defi token", "isDAT": true, "isLPS": true, "isLoanToken": false, "displaySymbol": "DUSD-DFI" }
            ],
            "page": { "next": "17" }
        }"#;

        let envelope: Envelope<Vec<AddressToken>> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.page.unwrap().next, "17");
        let tokens = envelope.data;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].amount, Decimal::new(125, 1));
        assert!(!tokens[0].is_lps);
        assert!(tokens[1].is_lps);
        assert_eq!(tokens[1].token_id().unwrap(), 17);
    }

    #[test]
    fn test_parse_pools() {
        let body = r#"{
            "data": [{
                "id": "17",
                "symbol": "DUSD-DFI",
                "displaySymbol": "DUSD-DFI",
                "name": "Decentralized USD-Default Defi token",
                "status": true,
                "tokenA": { "symbol": "DUSD", "displaySymbol": "DUSD", "id": "15", "reserve": "25000000.1", "blockCommission": "0" },
                "tokenB": { "symbol": "DFI", "displaySymbol": "DFI", "id": "0", "reserve": "10000000", "blockCommission": "0" },
                "priceRatio": { "ab": "2.50000001", "ba": "0.39999999" },
                "commission": "0.002",
                "totalLiquidity": { "token": "15811388.3", "usd": "50000000.2" },
                "tradeEnabled": true,
                "ownerAddress": "8UAhRuUFCyFUHEPD7qvtj8Zy2HxF5HH5nb",
                "rewardPct": "0.1",
                "creation": { "tx": "t", "height": 1 },
                "apr": { "reward": 0.3, "commission": 0.01, "total": 0.31 }
            }]
        }"#;

        let envelope: Envelope<Vec<PoolPair>> = serde_json::from_str(body).unwrap();
        assert!(envelope.page.is_none());
        let pool = &envelope.data[0];
        assert_eq!(pool.pool_id().unwrap(), 17);
        assert_eq!(pool.token_a.symbol, "DUSD");
        assert_eq!(pool.token_b.reserve, Decimal::from(10_000_000));
        assert_eq!(pool.price_ratio.ab, Decimal::new(250_000_001, 8));
        assert_eq!(pool.total_liquidity.usd, Some(Decimal::new(500_000_002, 1)));
    }

    #[test]
    fn test_parse_vault_envelope() {
        let body = r#"{"data":{
            "vaultId": "0000000000000000000000000000000000000000000000000000000000000abc",
            "loanScheme": { "id": "MIN200", "minColRatio": "200", "interestRate": "2" },
            "ownerAddress": "df1qowner",
            "state": "FROZEN",
            "informativeRatio": "-1",
            "collateralRatio": "-1",
            "collateralValue": "0",
            "loanValue": "0",
            "interestValue": "0",
            "collateralAmounts": [],
            "loanAmounts": [],
            "interestAmounts": []
        }}"#;

        let envelope: Envelope<LoanVault> = serde_json::from_str(body).unwrap();
        let vault = envelope.data;
        assert_eq!(vault.state, crate::chain::VaultState::Frozen);
        assert_eq!(vault.informative_ratio, Some(Decimal::from(-1)));
        assert_eq!(
            vault.vault_id.to_string(),
            "0000000000000000000000000000000000000000000000000000000000000abc"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":400,"type":"BadRequest","message":"Transaction decode failed"}}"#;
        assert_eq!(error_message(body), "Transaction decode failed");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_submit_error_classification() {
        assert!(classify_submit_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_submit_error(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_submit_error(StatusCode::BAD_REQUEST, "bad-txns-inputs-missingorspent")
            .is_retryable());
        assert!(matches!(
            classify_submit_error(StatusCode::BAD_REQUEST, "bad-txns-in-belowout"),
            Error::SubmitRejected(_)
        ));
    }
}
