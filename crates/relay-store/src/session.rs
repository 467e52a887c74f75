//! Per-address gateway session persistence.
//!
//! Key format: `session:<walletAddress>`. An empty value marks a session that
//! was explicitly cleared, which `load` reports the same as "never saved".

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::MemoryStore;
use crate::KeyValueStore;
use relay_types::Result;

const SESSION_KEY_PREFIX: &str = "session:";

/// Serialized gateway authentication material for one relay account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Gateway-specific fields kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WalletSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }
}

/// What the store holds for an address.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No entry was ever written.
    Never,
    /// The entry was cleared on logout.
    Cleared,
    /// The entry exists but could not be parsed.
    Corrupt,
    Active(WalletSession),
}

pub fn session_key(address: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, address)
}

/// Session store keyed by wallet address.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Session store over a fresh `MemoryStore`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.backend)
    }

    /// Persist `session` for `address`, replacing any previous one.
    /// Empty addresses are ignored.
    pub async fn save(&self, address: &str, session: &WalletSession) -> Result<()> {
        if address.is_empty() {
            return Ok(());
        }
        let raw = serde_json::to_string(session)?;
        self.backend.set_item(&session_key(address), &raw).await
    }

    /// Load the session for `address`. Missing, cleared, corrupt and
    /// unreadable entries all come back as `None`.
    pub async fn load(&self, address: &str) -> Option<WalletSession> {
        match self.inspect(address).await {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Mark the session for `address` as cleared. The key is kept with an
    /// empty value rather than removed.
    pub async fn clear(&self, address: &str) -> Result<()> {
        if address.is_empty() {
            return Ok(());
        }
        self.backend.set_item(&session_key(address), "").await
    }

    pub async fn inspect(&self, address: &str) -> SessionState {
        let raw = match self.backend.get_item(&session_key(address)).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(address, error = %e, "session storage read failed");
                return SessionState::Never;
            }
        };

        match raw {
            None => SessionState::Never,
            Some(raw) if raw.is_empty() => SessionState::Cleared,
            Some(raw) => match serde_json::from_str::<WalletSession>(&raw) {
                Ok(session) => SessionState::Active(session),
                Err(e) => {
                    debug!(address, error = %e, "discarding unparsable session");
                    SessionState::Corrupt
                }
            },
        }
    }
}
