//! Chaining dependent transactions
//!
//! A just-sent transaction's change output (index 1) becomes the sole
//! input of the next build, so the next step never re-queries the chain
//! and never touches unrelated outputs.

use rust_decimal::Decimal;

use super::{SpendableOutput, Transaction, Txid};
use crate::error::{Error, Result};

/// Position of the change output in every transaction the builder makes
pub const CHANGE_OUTPUT_INDEX: u32 = 1;

/// Spendable change of a sent transaction
///
/// Deliberately not `Clone`: building from a link consumes it, so a
/// link cannot feed two builds.
#[derive(Debug, PartialEq, Eq)]
pub struct PrevoutLink(SpendableOutput);

impl PrevoutLink {
    /// Wrap a pre-selected output for an externally constrained single-input build
    pub fn from_output(output: SpendableOutput) -> Self {
        Self(output)
    }

    pub fn txid(&self) -> Txid {
        self.0.txid
    }

    pub fn vout(&self) -> u32 {
        self.0.vout
    }

    pub fn value(&self) -> Decimal {
        self.0.value
    }

    pub fn output(&self) -> &SpendableOutput {
        &self.0
    }

    pub fn into_output(self) -> SpendableOutput {
        self.0
    }
}

/// Extract the change output of `tx` as the next build's input
///
/// # Errors
/// `Error::Decode` if `tx` has no output at the change index, which only
/// happens for transactions built outside this crate. Computing the txid
/// can also fail for an output value out of range.
pub fn next_input(tx: &Transaction) -> Result<PrevoutLink> {
    let change = tx.outputs.get(CHANGE_OUTPUT_INDEX as usize).ok_or_else(|| {
        Error::Decode(format!(
            "transaction has {} outputs, no change output to chain from",
            tx.outputs.len()
        ))
    })?;
    Ok(PrevoutLink(SpendableOutput {
        txid: tx.txid()?,
        vout: CHANGE_OUTPUT_INDEX,
        value: change.value,
        script: change.script.clone(),
        token_id: change.token_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{Script, TxIn, TxOut, TRANSACTION_VERSION};

    fn two_output_tx(change: Decimal) -> Transaction {
        let parent = SpendableOutput {
            txid: Txid::from_internal_bytes([5u8; 32]),
            vout: 0,
            value: change,
            script: Script::new(vec![0x00, 0x14]),
            token_id: 0,
        };
        Transaction {
            version: TRANSACTION_VERSION,
            inputs: vec![TxIn::spending(&parent)],
            outputs: vec![
                TxOut {
                    value: Decimal::ZERO,
                    script: Script::op_return(b"DfTx"),
                    token_id: 0,
                },
                TxOut {
                    value: change,
                    script: Script::new(vec![0x00, 0x14, 7]),
                    token_id: 0,
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn test_next_input_points_at_change() {
        let tx = two_output_tx(Decimal::new(97, 1));
        let link = next_input(&tx).unwrap();
        assert_eq!(link.txid(), tx.txid().unwrap());
        assert_eq!(link.vout(), CHANGE_OUTPUT_INDEX);
        assert_eq!(link.value(), tx.outputs[1].value);
        assert_eq!(link.output().script, tx.outputs[1].script);
    }

    #[test]
    fn test_next_input_requires_change_output() {
        let mut tx = two_output_tx(Decimal::ONE);
        tx.outputs.truncate(1);
        let err = next_input(&tx).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("no change output"));
    }
}
