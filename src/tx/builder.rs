//! Transaction assembly
//!
//! Every transaction has the same shape:
//! - inputs: either every selected spendable output, or one chained prevout
//! - output 0: the data output (`OP_RETURN <payload>`, value = payment)
//! - output 1: the change output back to the operator's script
//!
//! The change is what is left after payment and fee, so inputs always
//! equal outputs plus fee.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::chain_link::PrevoutLink;
use super::fee::FeeEstimator;
use super::selector::UtxoSelector;
use super::{
    OperationPayload, Script, SpendableOutput, Transaction, TxIn, TxOut, NATIVE_TOKEN,
    TRANSACTION_VERSION,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::signing::{SigningCapability, SigningProvider};

/// Output of a build
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub transaction: Transaction,
    /// Outputs spent by the inputs, in input order
    pub prevouts: Vec<SpendableOutput>,
    pub fee: Decimal,
    /// False when the transaction still has to be signed out-of-band
    pub signed: bool,
}

impl BuiltTransaction {
    pub fn total_input_value(&self) -> Decimal {
        self.prevouts.iter().map(|prevout| prevout.value).sum()
    }

    pub fn change_value(&self) -> Decimal {
        self.transaction.outputs[1].value
    }

    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

/// Builds (and, when the key allows it, signs) operation transactions
#[derive(Clone)]
pub struct TransactionBuilder {
    address: String,
    selector: UtxoSelector,
    fee_estimator: Arc<dyn FeeEstimator>,
    signer: Arc<dyn SigningProvider>,
    capability: SigningCapability,
    config: EngineConfig,
}

impl TransactionBuilder {
    pub fn new(
        address: impl Into<String>,
        selector: UtxoSelector,
        fee_estimator: Arc<dyn FeeEstimator>,
        signer: Arc<dyn SigningProvider>,
        capability: SigningCapability,
        config: EngineConfig,
    ) -> Self {
        Self {
            address: address.into(),
            selector,
            fee_estimator,
            signer,
            capability,
            config,
        }
    }

    /// Build a transaction carrying `payload`
    ///
    /// With `explicit_input` the build spends only that prevout and does
    /// not query the chain. Callers must serialize builds per address:
    /// two concurrent builds can select the same outputs.
    pub async fn build(
        &self,
        payload: &OperationPayload,
        change_script: &Script,
        explicit_input: Option<PrevoutLink>,
        payment: Decimal,
    ) -> Result<BuiltTransaction> {
        let sign = match &self.capability {
            SigningCapability::Unavailable { reason } => {
                return Err(Error::InvalidAddress(format!(
                    "cannot build for {}: {}",
                    self.address, reason
                )))
            }
            SigningCapability::WithoutOwnership { .. } => false,
            SigningCapability::WithOwnership { .. } => true,
        };

        if payment.is_sign_negative() && !payment.is_zero() {
            return Err(Error::InvalidAmount(format!("negative payment {}", payment)));
        }

        let prevouts = match explicit_input {
            Some(link) => vec![link.into_output()],
            None => {
                let target = payment + self.config.min_fee_floor;
                self.selector
                    .select_for(&self.address, self.config.utxo_limit, target)
                    .await?
            }
        };
        if prevouts.is_empty() {
            return Err(Error::InsufficientFunds {
                required: payment + self.config.min_fee_floor,
                available: Decimal::ZERO,
            });
        }
        let total: Decimal = prevouts.iter().map(|prevout| prevout.value).sum();

        let mut transaction = Transaction {
            version: TRANSACTION_VERSION,
            inputs: prevouts.iter().map(TxIn::spending).collect(),
            outputs: vec![
                TxOut {
                    value: payment,
                    script: payload.data_script(),
                    token_id: NATIVE_TOKEN,
                },
                TxOut {
                    value: total,
                    script: change_script.clone(),
                    token_id: NATIVE_TOKEN,
                },
            ],
            lock_time: 0,
        };

        let fee = self.fee_estimator.estimate(&transaction)?;
        let change = total - payment - fee;
        if change.is_sign_negative() && !change.is_zero() {
            return Err(Error::InsufficientFunds {
                required: payment + fee,
                available: total,
            });
        }
        transaction.outputs[1].value = change;

        debug!(
            "Built transaction: {} inputs, total {}, payment {}, fee {}, change {}",
            prevouts.len(),
            total,
            payment,
            fee,
            change
        );

        if !sign {
            info!("No key for {}, returning unsigned transaction", self.address);
            return Ok(BuiltTransaction {
                transaction,
                prevouts,
                fee,
                signed: false,
            });
        }

        let signed = self.signer.sign(&transaction, &prevouts).await?;
        Ok(BuiltTransaction {
            transaction: signed,
            prevouts,
            fee,
            signed: true,
        })
    }
}
