//! Transaction intent and gateway batch model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Hex;

/// The single transaction a caller wants executed through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub to: Hex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Hex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Hex>,
}

impl TransactionIntent {
    pub fn new(to: impl Into<Hex>) -> Self {
        Self { to: to.into(), value: None, data: None }
    }

    pub fn with_value(mut self, value: impl Into<Hex>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Hex>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Gateway-side state of a submitted batch transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Queued,
    Sending,
    Sent,
    Canceling,
    Canceled,
    Reverted,
    Confirmed,
}

impl TransactionState {
    /// States after which the batch will never produce a usable hash.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Canceling | Self::Canceled | Self::Reverted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Sending => "Sending",
            Self::Sent => "Sent",
            Self::Canceling => "Canceling",
            Self::Canceled => "Canceled",
            Self::Reverted => "Reverted",
            Self::Confirmed => "Confirmed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fee / gas projection for the pending batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEstimate {
    #[serde(default)]
    pub estimated_gas: Option<u64>,
    #[serde(default)]
    pub estimated_gas_price: Option<Hex>,
    #[serde(default)]
    pub fee_amount: Option<Hex>,
    #[serde(default)]
    pub fee_token: Option<Hex>,
}

/// Result of submitting the pending batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    #[serde(default, alias = "hash")]
    pub batch_hash: Option<Hex>,
}

/// A batch as last reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedBatch {
    #[serde(alias = "hash")]
    pub batch_hash: Hex,
    #[serde(default)]
    pub transaction_state: Option<TransactionState>,
    #[serde(default)]
    pub final_transaction_hash: Option<Hex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    GatewayBatchUpdated,
    #[serde(other)]
    Unknown,
}

/// Push event delivered on the gateway notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default, alias = "hash")]
    pub batch_hash: Option<Hex>,
}

impl NotificationEvent {
    pub fn batch_updated(batch_hash: impl Into<Hex>) -> Self {
        Self {
            kind: NotificationType::GatewayBatchUpdated,
            batch_hash: Some(batch_hash.into()),
        }
    }

    pub fn is_batch_update(&self) -> bool {
        self.kind == NotificationType::GatewayBatchUpdated
    }
}
