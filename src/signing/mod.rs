//! Signing capability
//!
//! Whether this session can sign for the configured address is resolved
//! once, at start-up, into a `SigningCapability`. Every component matches
//! on it instead of carrying an optional key around.

pub mod address;

#[cfg(test)]
pub(crate) mod mock;

pub use address::{decode_address, decode_spending_address, Network};

use async_trait::async_trait;
use std::fmt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tx::{Script, SpendableOutput, Transaction};

/// What the available key material can do for the configured address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningCapability {
    /// Address invalid or unrecoverable: nothing valid can be built
    Unavailable { reason: String },
    /// Address valid but not controlled by the key: build only, sign out-of-band
    WithoutOwnership { script: Script },
    /// Key controls the address: sign and broadcast autonomously
    WithOwnership { script: Script },
}

impl SigningCapability {
    pub fn can_sign(&self) -> bool {
        matches!(self, SigningCapability::WithOwnership { .. })
    }

    /// Locking script of the configured address, if it is valid
    pub fn script(&self) -> Option<&Script> {
        match self {
            SigningCapability::Unavailable { .. } => None,
            SigningCapability::WithoutOwnership { script }
            | SigningCapability::WithOwnership { script } => Some(script),
        }
    }
}

impl fmt::Display for SigningCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningCapability::Unavailable { reason } => write!(f, "unavailable ({})", reason),
            SigningCapability::WithoutOwnership { .. } => write!(f, "watch-only"),
            SigningCapability::WithOwnership { .. } => write!(f, "owner"),
        }
    }
}

/// Key material holder; signing itself happens outside this crate
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Resolve what this provider can do for `address`
    async fn derive_capability(&self, address: &str) -> SigningCapability;

    /// Sign every input of `tx`; `prevouts[i]` is the output spent by input `i`
    async fn sign(&self, tx: &Transaction, prevouts: &[SpendableOutput]) -> Result<Transaction>;
}

/// Provider for operators who keep their key elsewhere
///
/// Valid addresses resolve to `WithoutOwnership`; every built transaction
/// is handed back unsigned.
#[derive(Debug, Clone)]
pub struct WatchOnlyProvider {
    network: Network,
}

impl WatchOnlyProvider {
    pub fn new(network: Network) -> Self {
        Self { network }
    }
}

#[async_trait]
impl SigningProvider for WatchOnlyProvider {
    async fn derive_capability(&self, address: &str) -> SigningCapability {
        match decode_spending_address(address, self.network) {
            Ok(script) => {
                debug!("Address {} resolved, no key available", address);
                SigningCapability::WithoutOwnership { script }
            }
            Err(e) => SigningCapability::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    async fn sign(&self, _tx: &Transaction, _prevouts: &[SpendableOutput]) -> Result<Transaction> {
        Err(Error::Signing("watch-only wallet holds no key".to_string()))
    }
}
