//! JSON-RPC providers.
//!
//! - `JsonRpcProvider`: plain passthrough to a chain node
//! - `TransactionRelayProvider`: same shape, but `eth_sendTransaction` is
//!   executed as a gateway batch and resolves with the on-chain hash

use async_trait::async_trait;
use relay_types::Result;
use serde_json::Value;

pub mod config;
pub mod json_rpc;
pub mod relay;

pub use config::{EstimatePolicy, ProviderConfig};
pub use json_rpc::JsonRpcProvider;
pub use relay::TransactionRelayProvider;

/// Method name that the relay provider intercepts.
pub const SEND_TRANSACTION: &str = "eth_sendTransaction";

/// Anything that answers `send(method, params)` like a chain RPC provider.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}
