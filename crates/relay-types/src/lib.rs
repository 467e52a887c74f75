//! Shared types for the relay SDK.
//!
//! - Error taxonomy used across every crate
//! - Transaction intent / gateway batch model
//! - Hex, address and unit helpers

use thiserror::Error;

pub mod batch;
pub mod units;

pub use batch::{
    BatchEstimate, NotificationEvent, NotificationType, SubmitBatchResponse, SubmittedBatch,
    TransactionIntent, TransactionState,
};
pub use units::{bytes_to_hex, parse_units, to_checksum_address, to_quantity_hex};

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Relay SDK error types.
#[derive(Debug, Error)]
pub enum RelayError {
    /// HTTP / websocket / JSON-RPC transport failure. Never retried.
    #[error("{0}")]
    Transport(String),

    /// The node answered a JSON-RPC call with an error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The gateway accepted the batch but returned no batch hash.
    #[error("failed to send")]
    SubmissionFailed,

    /// The submitted batch reached a terminal failure state.
    #[error("{0}")]
    TransactionFailed(TransactionState),

    #[error("batch {batch_hash} not confirmed within {waited_secs}s")]
    ConfirmationTimeout { batch_hash: Hex, waited_secs: u64 },

    #[error("batch estimation failed: {0}")]
    EstimateFailed(String),

    /// The gateway session was destroyed while a call was waiting on it.
    #[error("gateway session closed")]
    SessionClosed,

    #[error("user rejected the request")]
    UserRejected,

    /// Bridge API answered without a data payload.
    #[error("{0}")]
    Bridge(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("wallet not connected")]
    NotConnected,

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Network-level failures from the gateway, node or bridge service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rpc { .. } | Self::Bridge(_))
    }

    /// Failures of the batch submission protocol itself.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::SubmissionFailed
                | Self::TransactionFailed(_)
                | Self::ConfirmationTimeout { .. }
                | Self::EstimateFailed(_)
                | Self::SessionClosed
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
