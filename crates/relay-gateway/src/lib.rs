//! Relay gateway client.
//!
//! - Batch building, estimation and submission against the gateway
//! - Submitted-batch status queries
//! - Push notification stream with per-call subscriptions
//! - Gateway session lifecycle (contract account, auth session, teardown)
//! - An in-memory gateway for tests and local runs

use std::sync::Arc;

use async_trait::async_trait;
use relay_store::SessionStore;
use relay_types::{
    BatchEstimate, Hex, Result, SubmitBatchResponse, SubmittedBatch, TransactionIntent,
};

pub mod client;
pub mod memory;
pub mod notifications;
pub mod session;

pub use client::{GatewayResponse, HttpGatewayClient};
pub use memory::{MemoryGateway, MemoryGatewayFactory};
pub use notifications::{NotificationHub, Subscription};
pub use session::{GatewayConfig, HttpGatewayFactory, HttpGatewaySession};

/// Request/response operations on the session's pending batch.
#[async_trait]
pub trait GatewayBatchClient: Send + Sync {
    /// Drop every pending intent. Idempotent.
    async fn clear_batch(&self) -> Result<()>;
    async fn add_transaction(&self, intent: &TransactionIntent) -> Result<()>;
    async fn estimate_batch(&self) -> Result<BatchEstimate>;
    async fn submit_batch(&self) -> Result<SubmitBatchResponse>;
    async fn get_submitted_batch(&self, batch_hash: &str) -> Result<SubmittedBatch>;
}

/// Subscribable stream of gateway state-change events.
pub trait NotificationStream: Send + Sync {
    fn subscribe(&self) -> Subscription;

    /// Number of subscriptions not yet released.
    fn active_subscriptions(&self) -> usize;
}

/// Signing adapter derived from the user's base wallet, used to authorize
/// gateway sessions instead of signing chain transactions directly.
#[async_trait]
pub trait RelayWalletProvider: Send + Sync {
    fn address(&self) -> &str;
    async fn sign_message(&self, message: &str) -> Result<Hex>;
}

/// A live gateway session bound to one relay wallet provider.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    fn batch_client(&self) -> Arc<dyn GatewayBatchClient>;
    fn notifications(&self) -> Arc<dyn NotificationStream>;

    /// Compute the smart-contract account owned by the relay wallet. With
    /// `sync` the account is also registered and authenticated with the gateway.
    async fn compute_contract_account(&self, sync: bool) -> Result<String>;

    /// Release every backing resource. Live subscriptions end immediately.
    async fn destroy(&self);
}

/// Opens gateway sessions for relay wallet providers.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn open(
        &self,
        wallet: Arc<dyn RelayWalletProvider>,
        sessions: SessionStore,
    ) -> Result<Arc<dyn GatewaySession>>;
}
