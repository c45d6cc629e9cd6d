//! Custody program
//!
//! Ties selection, building, signing, broadcasting and confirmation
//! together for one configured address and vault. Each operation helper
//! builds a ledger operation and either sends it (when this session holds
//! the key) or hands the unsigned transaction back for out-of-band
//! signing.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::chain::{
    ActivePrice, AddressToken, ChainQuery, ChainStats, ChainSubmit, CollateralToken, LoanToken,
    LoanVault, PoolPair, TokenInfo,
};
use crate::config::{Config, ConfirmationConfig, EngineConfig};
use crate::confirmation::ConfirmationWaiter;
use crate::dftx::{describe, DfTx, PoolSwap, ScriptBalances, TokenAmount, MAX_PRICE_UNBOUNDED};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::signing::{decode_address, Network, SigningCapability, SigningProvider};
use crate::tx::{
    next_input, FeeEstimator, PrevoutLink, PrevoutPool, Script, SizeFeeEstimator, Transaction,
    TransactionBuilder, TxIn, Txid, UtxoSelector, NATIVE_TOKEN, TRANSACTION_VERSION,
};

/// Result of `send_or_create`
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Signed and accepted by the node
    Sent { txid: Txid, transaction: Transaction },
    /// Built without a key; has to be signed elsewhere
    Unsigned(Transaction),
}

impl SendOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SendOutcome::Sent { transaction, .. } => transaction,
            SendOutcome::Unsigned(transaction) => transaction,
        }
    }

    pub fn txid(&self) -> Option<Txid> {
        match self {
            SendOutcome::Sent { txid, .. } => Some(*txid),
            SendOutcome::Unsigned(_) => None,
        }
    }

    /// Change of this transaction as input for the next step
    ///
    /// Consumes the outcome so one step yields at most one link.
    pub fn next_input(self) -> Result<PrevoutLink> {
        next_input(self.transaction())
    }
}

pub struct CustodyProgram {
    address: String,
    vault_id: Option<Txid>,
    network: Network,
    query: Arc<dyn ChainQuery>,
    signer: Arc<dyn SigningProvider>,
    notifier: Arc<dyn Notifier>,
    fee_estimator: Arc<dyn FeeEstimator>,
    broadcaster: Broadcaster,
    engine: EngineConfig,
    confirmation: ConfirmationConfig,
    capability: SigningCapability,
}

impl CustodyProgram {
    /// Program over `chain`; call `init` before any operation
    pub fn new<C>(
        config: &Config,
        chain: Arc<C>,
        signer: Arc<dyn SigningProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self>
    where
        C: ChainQuery + ChainSubmit + 'static,
    {
        let vault_id = if config.wallet.vault_id.is_empty() {
            None
        } else {
            Some(config.wallet.vault_id.parse()?)
        };

        Ok(Self {
            address: config.wallet.address.clone(),
            vault_id,
            network: config.ocean.network,
            query: chain.clone(),
            signer,
            notifier,
            fee_estimator: Arc::new(SizeFeeEstimator::new(config.engine.fee_rate_per_kb)),
            broadcaster: Broadcaster::new(chain, config.broadcast.clone()),
            engine: config.engine.clone(),
            confirmation: config.confirmation.clone(),
            capability: SigningCapability::Unavailable {
                reason: "not initialized".to_string(),
            },
        })
    }

    /// Resolve the signing capability for the configured address
    pub async fn init(&mut self) -> &SigningCapability {
        let capability = self.signer.derive_capability(&self.address).await;
        // Fees are estimated for P2WPKH inputs only
        self.capability = if capability.script().map_or(true, Script::is_p2wpkh) {
            capability
        } else {
            SigningCapability::Unavailable {
                reason: "only native segwit (P2WPKH) addresses can fund transactions".to_string(),
            }
        };
        info!("Wallet {} initialized: {}", self.address, self.capability);
        &self.capability
    }

    pub fn capability(&self) -> &SigningCapability {
        &self.capability
    }

    pub fn can_sign(&self) -> bool {
        self.capability.can_sign()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Last transaction accepted by the node
    pub async fn pending_tx(&self) -> Option<Txid> {
        self.broadcaster.pending_tx().await
    }

    /// Check the wallet is usable, telling the operator when it is not
    pub async fn validate(&self, needs_key: bool) -> bool {
        let problem = match &self.capability {
            SigningCapability::Unavailable { reason } => Some(reason.clone()),
            SigningCapability::WithoutOwnership { .. } if needs_key => {
                Some("no key for this address".to_string())
            }
            _ => None,
        };

        let Some(problem) = problem else {
            return true;
        };

        let message = format!(
            "Could not initialize wallet. Check your settings! Trying address: {} ({})",
            self.address, problem
        );
        error!("{}", message);
        if let Err(e) = self.notifier.send(&message).await {
            warn!("Failed to notify operator: {}", e);
        }
        false
    }

    pub async fn balance(&self) -> Result<Decimal> {
        self.query.get_balance(&self.address).await
    }

    pub async fn block_height(&self) -> Result<u64> {
        self.query.get_block_height().await
    }

    /// Account token balances of the address, keyed by symbol
    pub async fn token_balances(&self) -> Result<HashMap<String, AddressToken>> {
        let tokens = self.query.get_token_balances(&self.address).await?;
        Ok(tokens
            .into_iter()
            .map(|token| (token.symbol.clone(), token))
            .collect())
    }

    pub async fn token_balance(&self, symbol: &str) -> Result<Option<AddressToken>> {
        Ok(self.token_balances().await?.remove(symbol))
    }

    /// Current state of the configured vault
    pub async fn vault(&self) -> Result<LoanVault> {
        self.query.get_vault(&self.vault_id()?).await
    }

    pub async fn pools(&self) -> Result<Vec<PoolPair>> {
        self.query.get_pools().await
    }

    /// Pool by symbol, e.g. `DUSD-DFI`
    pub async fn pool(&self, symbol: &str) -> Result<Option<PoolPair>> {
        Ok(self
            .pools()
            .await?
            .into_iter()
            .find(|pool| pool.symbol == symbol))
    }

    pub async fn fixed_interval_price(&self, token: &str) -> Result<Option<ActivePrice>> {
        self.query.get_active_price(token).await
    }

    pub async fn token(&self, id: &str) -> Result<TokenInfo> {
        self.query.get_token(id).await
    }

    pub async fn loan_token(&self, id: &str) -> Result<LoanToken> {
        self.query.get_loan_token(id).await
    }

    pub async fn collateral_token(&self, id: &str) -> Result<CollateralToken> {
        self.query.get_collateral_token(id).await
    }

    pub async fn stats(&self) -> Result<ChainStats> {
        self.query.get_stats().await
    }

    /// Wait until `txid` is visible, with the budget for this session
    pub async fn wait_for_tx(&self, txid: &Txid, start_block: Option<u64>) -> bool {
        ConfirmationWaiter::new(self.query.clone(), &self.confirmation, &self.capability)
            .wait_for_inclusion(txid, start_block)
            .await
    }

    fn script(&self) -> Result<&Script> {
        self.capability.script().ok_or_else(|| {
            Error::InvalidAddress(format!("{} is not a usable address", self.address))
        })
    }

    fn vault_id(&self) -> Result<Txid> {
        self.vault_id
            .ok_or_else(|| Error::Config("wallet.vault_id is not set".to_string()))
    }

    fn builder(&self) -> TransactionBuilder {
        TransactionBuilder::new(
            self.address.clone(),
            UtxoSelector::new(self.query.clone(), self.engine.selection_policy),
            self.fee_estimator.clone(),
            self.signer.clone(),
            self.capability.clone(),
            self.engine.clone(),
        )
    }

    /// Build `dftx`, then send it if this session can sign
    ///
    /// With `prevout` the transaction spends only that chained output and
    /// waits before the first send attempt so the parent can propagate.
    pub async fn send_or_create(
        &self,
        dftx: DfTx,
        prevout: Option<PrevoutLink>,
        payment: Decimal,
    ) -> Result<SendOutcome> {
        let payload = dftx.to_payload()?;
        let chained = prevout.is_some();
        debug!("Building {} (chained: {})", dftx.kind(), chained);

        let built = self
            .builder()
            .build(&payload, self.script()?, prevout, payment)
            .await?;

        if !built.signed {
            return Ok(SendOutcome::Unsigned(built.into_transaction()));
        }

        let transaction = built.into_transaction();
        let txid = self
            .broadcaster
            .send(&transaction, self.broadcaster.initial_delay(chained))
            .await?;
        info!("{} sent: {}", dftx.kind(), txid);
        Ok(SendOutcome::Sent { txid, transaction })
    }

    pub async fn deposit_to_vault(
        &self,
        token: u32,
        amount: Decimal,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::DepositToVault {
            vault_id: self.vault_id()?,
            from: self.script()?.clone(),
            amount: TokenAmount::new(token, amount),
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    pub async fn withdraw_from_vault(
        &self,
        token: u32,
        amount: Decimal,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::WithdrawFromVault {
            vault_id: self.vault_id()?,
            to: self.script()?.clone(),
            amount: TokenAmount::new(token, amount),
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    pub async fn take_loans(
        &self,
        amounts: Vec<TokenAmount>,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::TakeLoan {
            vault_id: self.vault_id()?,
            to: self.script()?.clone(),
            amounts,
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    pub async fn payback_loans(
        &self,
        amounts: Vec<TokenAmount>,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::PaybackLoan {
            vault_id: self.vault_id()?,
            from: self.script()?.clone(),
            amounts,
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    fn own_swap(
        &self,
        amount: Decimal,
        from_token: u32,
        to_token: u32,
        max_price: Option<Decimal>,
    ) -> Result<PoolSwap> {
        let script = self.script()?;
        Ok(PoolSwap {
            from_script: script.clone(),
            from_token,
            from_amount: amount,
            to_script: script.clone(),
            to_token,
            max_price: max_price.unwrap_or_else(|| Decimal::from(MAX_PRICE_UNBOUNDED)),
        })
    }

    pub async fn swap(
        &self,
        amount: Decimal,
        from_token: u32,
        to_token: u32,
        max_price: Option<Decimal>,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let swap = self.own_swap(amount, from_token, to_token, max_price)?;
        self.send_or_create(DfTx::PoolSwap(swap), prevout, Decimal::ZERO)
            .await
    }

    pub async fn composite_swap(
        &self,
        amount: Decimal,
        from_token: u32,
        to_token: u32,
        pools: Vec<u32>,
        max_price: Option<Decimal>,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let swap = self.own_swap(amount, from_token, to_token, max_price)?;
        self.send_or_create(DfTx::CompositeSwap { swap, pools }, prevout, Decimal::ZERO)
            .await
    }

    pub async fn add_liquidity(
        &self,
        amounts: Vec<TokenAmount>,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let script = self.script()?;
        let dftx = DfTx::AddLiquidity {
            from: vec![ScriptBalances {
                script: script.clone(),
                balances: amounts,
            }],
            share_address: script.clone(),
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    pub async fn remove_liquidity(
        &self,
        pool_id: u32,
        amount: Decimal,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::RemoveLiquidity {
            script: self.script()?.clone(),
            pool_id,
            amount,
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    /// Move native coins from outputs into the address's token account
    ///
    /// The amount leaves through the data output, so it is the payment.
    pub async fn utxo_to_own_account(
        &self,
        amount: Decimal,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::UtxosToAccount {
            to: vec![ScriptBalances {
                script: self.script()?.clone(),
                balances: vec![TokenAmount::new(NATIVE_TOKEN, amount)],
            }],
        };
        self.send_or_create(dftx, prevout, amount).await
    }

    /// Transfer native token balance to another address's account
    pub async fn send_to_account(
        &self,
        amount: Decimal,
        address: &str,
        prevout: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let dftx = DfTx::AccountToAccount {
            from: self.script()?.clone(),
            to: vec![ScriptBalances {
                script: decode_address(address, self.network)?,
                balances: vec![TokenAmount::new(NATIVE_TOKEN, amount)],
            }],
        };
        self.send_or_create(dftx, prevout, Decimal::ZERO).await
    }

    /// Hand unsigned transactions to the operator
    pub async fn send_unsigned_to_operator(&self, txs: &[Transaction]) -> Result<()> {
        let mut message = String::from("Please sign and send:\n");
        for tx in txs {
            if let Some(kind) = tx.outputs.first().and_then(|out| describe(&out.script)) {
                debug!("Unsigned {} handed to operator", kind);
            }
            message.push_str(&tx.to_hex()?);
            message.push('\n');
        }
        self.notifier.send(&message).await
    }

    /// Send `tx`, first moving it onto the single chained input `link`
    ///
    /// Outputs are kept; the change is recomputed from the chained value.
    /// The returned outcome carries the transaction as sent, which differs
    /// from `tx` whenever it was moved.
    pub async fn rebase_on_prevout(
        &self,
        tx: Transaction,
        link: Option<PrevoutLink>,
    ) -> Result<SendOutcome> {
        let Some(link) = link else {
            let txid = self.broadcaster.send(&tx, Duration::ZERO).await?;
            return Ok(SendOutcome::Sent {
                txid,
                transaction: tx,
            });
        };
        if !self.can_sign() {
            return Err(Error::Signing(
                "cannot move a transaction onto a chained input without a key".to_string(),
            ));
        }
        if tx.outputs.len() < 2 {
            return Err(Error::Decode(
                "transaction has no change output to recompute".to_string(),
            ));
        }

        let prevout = link.into_output();
        let mut rebased = Transaction {
            version: TRANSACTION_VERSION,
            inputs: vec![TxIn::spending(&prevout)],
            outputs: tx.outputs,
            lock_time: 0,
        };
        let fee = self.fee_estimator.estimate(&rebased)?;
        let spent_elsewhere: Decimal = rebased
            .outputs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, out)| out.value)
            .sum();
        let change = prevout.value - spent_elsewhere - fee;
        if change.is_sign_negative() && !change.is_zero() {
            return Err(Error::InsufficientFunds {
                required: spent_elsewhere + fee,
                available: prevout.value,
            });
        }
        rebased.outputs[1].value = change;

        let signed = self.signer.sign(&rebased, &[prevout]).await?;
        let txid = self
            .broadcaster
            .send(&signed, self.broadcaster.initial_delay(true))
            .await?;
        Ok(SendOutcome::Sent {
            txid,
            transaction: signed,
        })
    }

    /// Send signed transactions in order
    ///
    /// With `chained`, every transaction after the first is moved onto the
    /// change of the one actually sent before it.
    pub async fn broadcast_all(
        &self,
        txs: Vec<Transaction>,
        chained: bool,
    ) -> Result<Vec<Txid>> {
        let total = txs.len();
        let mut sent = Vec::with_capacity(total);
        let mut previous: Option<SendOutcome> = None;
        for tx in txs {
            let link = match previous.take() {
                Some(outcome) if chained => Some(outcome.next_input()?),
                _ => None,
            };
            let outcome = self.rebase_on_prevout(tx, link).await?;
            if let Some(txid) = outcome.txid() {
                info!("Sent {} of {}: {}", sent.len() + 1, total, txid);
                sent.push(txid);
            }
            previous = Some(outcome);
        }
        Ok(sent)
    }

    /// Sign and send externally built transactions, in order
    ///
    /// Inputs are matched against this address's spendable outputs; change
    /// of each sent transaction is available to the ones after it.
    pub async fn sign_and_send_raw(&self, raw_txs: &[String]) -> Result<Vec<Txid>> {
        if !self.can_sign() {
            return Err(Error::Signing(
                "asked to sign, but this session holds no key".to_string(),
            ));
        }

        let unspent = self
            .query
            .get_spendable_outputs(&self.address, self.engine.resign_utxo_limit)
            .await?;
        let mut pool = PrevoutPool::new(unspent);
        debug!("Re-signing {} transactions against {} outputs", raw_txs.len(), pool.len());

        let mut sent = Vec::with_capacity(raw_txs.len());
        for raw in raw_txs {
            let tx = Transaction::from_hex(raw)?;
            let prevouts = tx
                .inputs
                .iter()
                .map(|input| {
                    pool.take(&input.txid, input.vout)
                        .ok_or_else(|| Error::Signing("used input not found".to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let signed = self.signer.sign(&tx, &prevouts).await?;
            let txid = self.broadcaster.send(&signed, Duration::ZERO).await?;
            if signed.outputs.len() > 1 {
                pool.put(next_input(&signed)?.into_output());
            }
            sent.push(txid);
        }
        Ok(sent)
    }
}
