//! Fee estimation
//!
//! Fees are a pure function of transaction size. Unsigned inputs are
//! costed as if they already carried a P2WPKH witness, so the estimate
//! made before signing still covers the signed transaction. Funding
//! addresses are limited to P2WPKH for that reason
//! (`signing::decode_spending_address`).

use rust_decimal::{Decimal, RoundingStrategy};

use super::Transaction;
use crate::error::Result;

/// Witness stack of a P2WPKH spend: item count, signature, pubkey
const P2WPKH_WITNESS_SIZE: usize = 1 + (1 + 72) + (1 + 33);

/// Segwit marker + flag
const SEGWIT_OVERHEAD: usize = 2;

/// Computes the minimum fee a transaction shape requires
pub trait FeeEstimator: Send + Sync {
    fn estimate(&self, tx: &Transaction) -> Result<Decimal>;
}

/// Fee proportional to virtual size
#[derive(Debug, Clone)]
pub struct SizeFeeEstimator {
    /// Fee per 1000 virtual bytes
    fee_rate_per_kb: Decimal,
}

impl SizeFeeEstimator {
    pub fn new(fee_rate_per_kb: Decimal) -> Self {
        Self { fee_rate_per_kb }
    }

    pub fn fee_rate_per_kb(&self) -> Decimal {
        self.fee_rate_per_kb
    }

    /// Fee for a given virtual size, rounded up to 8 decimal places
    pub fn fee_for_vsize(&self, vsize: usize) -> Decimal {
        (self.fee_rate_per_kb * Decimal::from(vsize) / Decimal::from(1000))
            .round_dp_with_strategy(8, RoundingStrategy::AwayFromZero)
    }
}

impl FeeEstimator for SizeFeeEstimator {
    fn estimate(&self, tx: &Transaction) -> Result<Decimal> {
        Ok(self.fee_for_vsize(virtual_size(tx)?))
    }
}

/// Virtual size (weight / 4, rounded up) assuming P2WPKH witnesses on unsigned inputs
pub fn virtual_size(tx: &Transaction) -> Result<usize> {
    let base = super::codec::encode(tx, false)?.len();
    let witness: usize = if tx.inputs.is_empty() {
        0
    } else {
        SEGWIT_OVERHEAD
            + tx.inputs
                .iter()
                .map(|input| {
                    if input.witness.is_empty() {
                        P2WPKH_WITNESS_SIZE
                    } else {
                        compact_size_len(input.witness.len())
                            + input
                                .witness
                                .iter()
                                .map(|item| compact_size_len(item.len()) + item.len())
                                .sum::<usize>()
                    }
                })
                .sum::<usize>()
    };
    let weight = base * 4 + witness;
    Ok(weight.div_ceil(4))
}

fn compact_size_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
