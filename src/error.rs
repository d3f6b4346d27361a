use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Error taxonomy of the payment engine.
///
/// Business-rule failures (`AccessDenied`, `SessionNotPending`,
/// `InsufficientFunds`) are terminal and returned verbatim to the caller.
/// `Storage` failures leave no partial state behind (every multi-step
/// sequence runs in one atomic unit) and are safe to retry.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    #[error("session {0} is not pending")]
    SessionNotPending(Uuid),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("idempotency key already exists: {0}")]
    DuplicateKey(String),

    #[error("payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Wraps an arbitrary backend failure message as a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(Box::new(std::io::Error::other(msg.into())))
    }

    /// True for infrastructure failures that the caller may retry with the
    /// same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<csv::Error> for PaymentError {
    fn from(e: csv::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        // Network failure toward the processor is retryable infrastructure,
        // not a verification verdict.
        Self::Storage(Box::new(e))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}
