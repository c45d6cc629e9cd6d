//! Owned pool of candidate prevouts for re-signing
//!
//! Slots are never shifted: taking an output empties its slot, and
//! returned change is appended to a fresh slot. The pool is owned by a
//! single re-signing run.

use std::collections::HashMap;

use super::{SpendableOutput, Txid};

#[derive(Debug, Default)]
pub struct PrevoutPool {
    slots: Vec<Option<SpendableOutput>>,
    index: HashMap<(Txid, u32), usize>,
}

impl PrevoutPool {
    pub fn new(outputs: impl IntoIterator<Item = SpendableOutput>) -> Self {
        let mut pool = Self::default();
        for output in outputs {
            pool.put(output);
        }
        pool
    }

    /// Remove and return the output at `txid:vout`
    pub fn take(&mut self, txid: &Txid, vout: u32) -> Option<SpendableOutput> {
        let slot = self.index.remove(&(*txid, vout))?;
        self.slots[slot].take()
    }

    /// Return an output to the pool (e.g. change of a just-sent transaction)
    pub fn put(&mut self, output: SpendableOutput) {
        let key = (output.txid, output.vout);
        if let Some(&slot) = self.index.get(&key) {
            self.slots[slot] = Some(output);
            return;
        }
        self.index.insert(key, self.slots.len());
        self.slots.push(Some(output));
    }

    pub fn contains(&self, txid: &Txid, vout: u32) -> bool {
        self.index.contains_key(&(*txid, vout))
    }

    /// Number of outputs currently available
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Script;
    use rust_decimal::Decimal;

    fn output(n: u8, vout: u32) -> SpendableOutput {
        SpendableOutput {
            txid: Txid::from_internal_bytes([n; 32]),
            vout,
            value: Decimal::ONE,
            script: Script::default(),
            token_id: 0,
        }
    }

    #[test]
    fn test_take_is_exactly_once() {
        let mut pool = PrevoutPool::new(vec![output(1, 0), output(1, 1)]);
        let txid = Txid::from_internal_bytes([1; 32]);

        assert_eq!(pool.take(&txid, 1), Some(output(1, 1)));
        assert_eq!(pool.take(&txid, 1), None);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&txid, 0));
    }

    #[test]
    fn test_put_returns_change() {
        let mut pool = PrevoutPool::default();
        assert!(pool.is_empty());
        pool.put(output(2, 1));
        assert!(pool.contains(&Txid::from_internal_bytes([2; 32]), 1));
        assert_eq!(pool.len(), 1);
    }
}
