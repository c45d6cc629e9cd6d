//! Vault Custody Library
//!
//! Builds, signs, broadcasts and confirms ledger operations for one
//! operator address on a UTXO chain with token-carrying outputs.

pub mod broadcast;
pub mod chain;
pub mod cli;
pub mod config;
pub mod confirmation;
pub mod dftx;
pub mod error;
pub mod notify;
pub mod program;
pub mod signing;
pub mod tx;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use program::{CustodyProgram, SendOutcome};
