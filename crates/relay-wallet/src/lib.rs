//! Wallet activation for the relay SDK.
//!
//! Decides per connection whether transactions go straight through the
//! user's wallet or through the relay gateway, and owns the relay session's
//! lifecycle from activation to teardown.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod connector;
pub mod context;

pub use config::{RelayConfig, RelayNetwork};
pub use connector::{derive_relay_wallet, Connector, ConnectorKind, DirectWallet, RelayUpgrade};
pub use context::{ActivationPhase, WalletContext};

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
