//! Wallet session persistence for the relay SDK.
//!
//! Defines the `KeyValueStore` trait that storage backends implement (the
//! equivalent of browser local storage) and the `SessionStore` that keeps one
//! serialized gateway session per wallet address on top of it.

use async_trait::async_trait;
use relay_types::Result;

pub mod file;
pub mod memory;
pub mod session;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use session::{session_key, SessionState, SessionStore, WalletSession};

/// Durable string key/value storage.
///
/// All methods are async to support both in-memory and persistent backends.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}
