//! Test signer that attaches dummy P2WPKH witnesses

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{SigningCapability, SigningProvider};
use crate::error::{Error, Result};
use crate::tx::{Script, SpendableOutput, Transaction};

pub(crate) struct MockSigner {
    capability: SigningCapability,
    reject: bool,
    sign_calls: AtomicU32,
}

impl MockSigner {
    pub fn owner(script: &Script) -> Self {
        Self::with(SigningCapability::WithOwnership {
            script: script.clone(),
        })
    }

    pub fn watch_only(script: &Script) -> Self {
        Self::with(SigningCapability::WithoutOwnership {
            script: script.clone(),
        })
    }

    pub fn unavailable() -> Self {
        Self::with(SigningCapability::Unavailable {
            reason: "invalid address".to_string(),
        })
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn sign_calls(&self) -> u32 {
        self.sign_calls.load(Ordering::SeqCst)
    }

    fn with(capability: SigningCapability) -> Self {
        Self {
            capability,
            reject: false,
            sign_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SigningProvider for MockSigner {
    async fn derive_capability(&self, _address: &str) -> SigningCapability {
        self.capability.clone()
    }

    async fn sign(&self, tx: &Transaction, prevouts: &[SpendableOutput]) -> Result<Transaction> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(Error::Signing("input already spent".to_string()));
        }
        if prevouts.len() != tx.inputs.len() {
            return Err(Error::Signing(format!(
                "{} prevouts for {} inputs",
                prevouts.len(),
                tx.inputs.len()
            )));
        }
        let mut signed = tx.clone();
        for input in signed.inputs.iter_mut() {
            input.witness = vec![vec![0x30; 72], vec![0x02; 33]];
        }
        Ok(signed)
    }
}
