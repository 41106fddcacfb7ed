//! Error types for the swap relay client SDK.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the swap relay client SDK.
#[derive(Error, Debug)]
pub enum Error {
    /// Swap not found in storage.
    #[error("Swap not found: {0}")]
    SwapNotFound(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Bitcoin header or transaction error.
    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    /// An authorization signature failed one of its preconditions
    /// (prefix mismatch, expiry, replay nonce, wrong signer).
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// A local precondition on swap data failed (not refundable, wrong
    /// pay status, structural mismatch against an on-chain event).
    #[error("Swap data verification failed: {0}")]
    SwapDataVerification(String),

    /// An ERC-20 allowance/approval step could not be constructed.
    #[error("Cannot initialize allowance/ATA: {0}")]
    CannotInitializeAta(String),

    /// A submitted transaction reverted on-chain.
    #[error("Transaction {0} reverted")]
    TxReverted(String),

    /// The intermediary rejected or timed out a payment authorization request.
    #[error("Payment authorization failed: {0}")]
    PaymentAuth(String),

    /// The relay has not yet advanced to the height this operation requires.
    #[error("Relay not synchronized: need height {needed}, have {have}")]
    NotSynchronized {
        /// Height required by the caller.
        needed: u32,
        /// Height the relay has currently reached.
        have: u32,
    },

    /// A collaborator HTTP endpoint returned a non-2xx response.
    #[error("HTTP error {status}: {body}")]
    HttpResponse {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated by the caller if large).
        body: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// Caller supplied an argument that violates a local contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Network/HTTP transport error.
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error with context.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

impl Error {
    /// Whether retrying the operation that produced this error could plausibly
    /// succeed. Used by [`crate::retry::try_with_retries`]'s default classifier.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::SignatureVerification(_)
                | Error::SwapDataVerification(_)
                | Error::InvalidArgument(_)
                | Error::Cancelled
                | Error::TxReverted(_)
                | Error::PaymentAuth(_)
        )
    }
}
