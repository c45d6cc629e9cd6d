//! Error types for the custody engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the custody engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Chain query errors
    #[error("Chain query failed: {0}")]
    Query(String),

    #[error("Chain query timeout after {0}ms")]
    QueryTimeout(u64),

    // Build errors
    #[error("Insufficient funds: {available} available, {required} required")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    // Submission errors
    #[error("Transaction submission failed: {0}")]
    SubmitTransient(String),

    #[error("Transaction rejected: {0}")]
    SubmitRejected(String),

    #[error("Broadcast failed after {attempts} attempts: {last}")]
    Broadcast { attempts: u32, last: Box<Error> },

    // Codec errors
    #[error("Transaction decode error: {0}")]
    Decode(String),

    // Notification errors
    #[error("Notification failed: {0}")]
    Notification(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SubmitTransient(_) | Error::QueryTimeout(_) | Error::Notification(_)
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::QueryTimeout(0)
        } else {
            Error::Query(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from hex errors
impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Decode(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
