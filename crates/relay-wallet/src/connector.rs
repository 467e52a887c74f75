//! Wallet connectors and relay wallet derivation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use relay_gateway::RelayWalletProvider;
use relay_provider::RpcProvider;
use relay_types::Result;

/// Capability class of a wallet connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    /// Browser-extension wallet injected into the page.
    Injected,
    /// Wallet reached over the wallet-connect protocol.
    WalletConnect,
    Other,
}

impl ConnectorKind {
    pub fn supports_relay(self) -> bool {
        matches!(self, Self::Injected | Self::WalletConnect)
    }
}

/// A wallet connected directly, bypassing the relay gateway.
#[derive(Clone)]
pub struct DirectWallet {
    pub chain_id: u64,
    pub address: String,
    pub provider: Arc<dyn RpcProvider>,
}

impl std::fmt::Debug for DirectWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectWallet")
            .field("chain_id", &self.chain_id)
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier remembered for eager reconnects.
    fn id(&self) -> &str;

    fn kind(&self) -> ConnectorKind;

    /// Connect the wallet directly. Determines the connected chain.
    async fn activate(&self) -> Result<DirectWallet>;

    async fn deactivate(&self);

    /// Whether the wallet already granted this site access.
    async fn is_authorized(&self) -> bool {
        false
    }

    /// Build the signing adapter used to authorize gateway sessions.
    async fn relay_wallet(&self) -> Result<Arc<dyn RelayWalletProvider>>;
}

/// Outcome of trying to upgrade a direct connection to the relay path.
pub enum RelayUpgrade {
    Ready(Arc<dyn RelayWalletProvider>),
    /// The user turned down the relay connection request.
    Declined,
    /// Derivation failed for a reason other than the user.
    Unavailable(String),
    /// The connector cannot produce a relay wallet at all.
    Unsupported,
}

impl RelayUpgrade {
    pub fn into_wallet(self) -> Option<Arc<dyn RelayWalletProvider>> {
        match self {
            Self::Ready(wallet) => Some(wallet),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RelayUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(wallet) => write!(f, "Ready({})", wallet.address()),
            Self::Declined => f.write_str("Declined"),
            Self::Unavailable(reason) => write!(f, "Unavailable({})", reason),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// Derive a relay wallet from `connector`.
///
/// Wallet-connect sessions are wrapped directly. Injected wallets prompt the
/// user, and any failure there is treated as the user declining.
pub async fn derive_relay_wallet(connector: &dyn Connector) -> RelayUpgrade {
    match connector.kind() {
        ConnectorKind::WalletConnect => match connector.relay_wallet().await {
            Ok(wallet) => RelayUpgrade::Ready(wallet),
            Err(e) => {
                warn!(connector = connector.id(), error = %e, "wallet-connect relay derivation failed");
                RelayUpgrade::Unavailable(e.to_string())
            }
        },
        ConnectorKind::Injected => match connector.relay_wallet().await {
            Ok(wallet) => RelayUpgrade::Ready(wallet),
            Err(e) => {
                debug!(connector = connector.id(), error = %e, "injected relay connect declined");
                RelayUpgrade::Declined
            }
        },
        ConnectorKind::Other => RelayUpgrade::Unsupported,
    }
}
