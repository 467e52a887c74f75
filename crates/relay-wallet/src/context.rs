//! Wallet context: one active wallet / relay session for the application.
//!
//! `activate` connects the direct wallet first, then tries to upgrade the
//! connection to the relay path. Anything that goes wrong during the upgrade
//! leaves the direct wallet in charge.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::connector::{derive_relay_wallet, Connector, ConnectorKind, DirectWallet};
use relay_gateway::{GatewayFactory, GatewaySession, HttpGatewayFactory, RelayWalletProvider};
use relay_provider::{JsonRpcProvider, RpcProvider, TransactionRelayProvider};
use relay_store::SessionStore;
use relay_types::Result;

/// Store key holding the id of the last connector that signed in.
pub const CONNECTOR_MARKER_KEY: &str = "connectorId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationPhase {
    #[default]
    Disconnected,
    Connecting,
    DirectActive,
    /// Relay session open, contract account not (yet) known.
    RelayPending,
    RelayActive,
}

struct RelayLink {
    wallet: Arc<dyn RelayWalletProvider>,
    session: Arc<dyn GatewaySession>,
    provider: Arc<TransactionRelayProvider>,
}

#[derive(Default)]
struct ContextState {
    phase: ActivationPhase,
    connector: Option<Arc<dyn Connector>>,
    direct: Option<DirectWallet>,
    relay: Option<RelayLink>,
    account: Option<String>,
}

pub struct WalletContext {
    config: RelayConfig,
    sessions: SessionStore,
    gateways: Arc<dyn GatewayFactory>,
    network: Arc<dyn RpcProvider>,
    // Serializes activate / deactivate.
    activation: Mutex<()>,
    state: RwLock<ContextState>,
}

impl WalletContext {
    pub fn new(config: RelayConfig, sessions: SessionStore, gateways: Arc<dyn GatewayFactory>) -> Self {
        let network = Arc::new(JsonRpcProvider::new(
            &config.network_url,
            Some(config.request_timeout_ms),
        ));
        Self {
            config,
            sessions,
            gateways,
            network,
            activation: Mutex::new(()),
            state: RwLock::new(ContextState::default()),
        }
    }

    /// Context talking to the HTTP gateway described by `config`.
    pub fn http(config: RelayConfig, sessions: SessionStore) -> Self {
        let gateways = Arc::new(HttpGatewayFactory::new(config.gateway_config()));
        Self::new(config, sessions, gateways)
    }

    /// Replace the read-only provider used when nothing is connected and for
    /// relay passthrough calls.
    pub fn with_network_provider(mut self, network: Arc<dyn RpcProvider>) -> Self {
        self.network = network;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn relay_eligible(&self, chain_id: u64, kind: ConnectorKind) -> bool {
        !self.config.relay_chain_ids().contains(&chain_id) && kind.supports_relay()
    }

    /// Connect through `connector`, upgrading to the relay path when the
    /// wallet's chain and connector class allow it.
    ///
    /// Only a failure to connect the direct wallet is returned as an error.
    pub async fn activate(&self, connector: Arc<dyn Connector>) -> Result<()> {
        let _activation = self.activation.lock().await;

        let previous = {
            let mut state = self.state.write().await;
            let previous = state.relay.take();
            state.phase = ActivationPhase::Connecting;
            state.account = None;
            state.direct = None;
            state.connector = Some(Arc::clone(&connector));
            previous
        };
        if let Some(link) = previous {
            debug!(owner = link.wallet.address(), "dropping previous relay session");
            link.session.destroy().await;
        }

        let direct = match connector.activate().await {
            Ok(direct) => direct,
            Err(e) => {
                warn!(connector = connector.id(), error = %e, "wallet connection failed");
                *self.state.write().await = ContextState::default();
                return Err(e);
            }
        };
        let chain_id = direct.chain_id;
        info!(
            connector = connector.id(),
            chain_id,
            address = %direct.address,
            "wallet connected"
        );
        {
            let mut state = self.state.write().await;
            state.direct = Some(direct);
            state.phase = ActivationPhase::DirectActive;
        }
        self.remember_connector(connector.id()).await;

        if !self.relay_eligible(chain_id, connector.kind()) {
            debug!(chain_id, kind = ?connector.kind(), "relay not eligible");
            return Ok(());
        }

        let wallet = match derive_relay_wallet(connector.as_ref()).await.into_wallet() {
            Some(wallet) => wallet,
            None => return Ok(()),
        };
        let session = match self
            .gateways
            .open(Arc::clone(&wallet), self.sessions.clone())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(owner = wallet.address(), error = %e, "gateway session unavailable");
                return Ok(());
            }
        };
        let provider = Arc::new(TransactionRelayProvider::with_passthrough(
            Arc::clone(&self.network),
            session.batch_client(),
            session.notifications(),
            self.config.provider.clone(),
        ));
        {
            let mut state = self.state.write().await;
            state.relay = Some(RelayLink {
                wallet: Arc::clone(&wallet),
                session: Arc::clone(&session),
                provider,
            });
            state.phase = ActivationPhase::RelayPending;
        }

        match session.compute_contract_account(true).await {
            Ok(account) => {
                info!(owner = wallet.address(), account = %account, "relay account ready");
                let mut state = self.state.write().await;
                state.account = Some(account);
                state.phase = ActivationPhase::RelayActive;
            }
            Err(e) => {
                warn!(
                    owner = wallet.address(),
                    error = %e,
                    "relay account unavailable, using direct wallet"
                );
                let link = {
                    let mut state = self.state.write().await;
                    state.phase = ActivationPhase::DirectActive;
                    state.relay.take()
                };
                if let Some(link) = link {
                    link.session.destroy().await;
                }
            }
        }
        Ok(())
    }

    /// Disconnect the wallet and tear down any relay session, clearing the
    /// persisted session of the relay account.
    pub async fn deactivate(&self) {
        let _activation = self.activation.lock().await;

        let state = std::mem::take(&mut *self.state.write().await);
        if let Some(connector) = &state.connector {
            connector.deactivate().await;
        }
        if let Some(link) = state.relay {
            if let Some(account) = &state.account {
                if let Err(e) = self.sessions.clear(account).await {
                    warn!(account = %account, error = %e, "failed to clear relay session");
                }
            }
            link.session.destroy().await;
        }
        if let Err(e) = self.sessions.backend().remove_item(CONNECTOR_MARKER_KEY).await {
            debug!(error = %e, "failed to remove connector marker");
        }
        info!("wallet disconnected");
    }

    /// Reconnect a wallet that signed in during an earlier run.
    ///
    /// Activates only if the connector is already authorized and the sign-in
    /// marker is present. Returns whether activation succeeded.
    pub async fn eager_connect(&self, connector: Arc<dyn Connector>) -> bool {
        if !connector.is_authorized().await {
            return false;
        }
        let marker = match self.sessions.backend().get_item(CONNECTOR_MARKER_KEY).await {
            Ok(marker) => marker,
            Err(e) => {
                debug!(error = %e, "connector marker unreadable");
                None
            }
        };
        if marker.map_or(true, |m| m.is_empty()) {
            return false;
        }
        match self.activate(connector).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "eager connect failed");
                false
            }
        }
    }

    /// Re-run activation with the current connector after the wallet switched
    /// chains.
    pub async fn on_chain_changed(&self) {
        self.reactivate("chain changed").await;
    }

    /// Re-run activation after the wallet reported new accounts. An empty
    /// list (wallet locked) is ignored.
    pub async fn on_accounts_changed(&self, accounts: &[String]) {
        if accounts.is_empty() {
            return;
        }
        self.reactivate("accounts changed").await;
    }

    async fn reactivate(&self, reason: &str) {
        let connector = self.state.read().await.connector.clone();
        if let Some(connector) = connector {
            debug!(connector = connector.id(), reason, "re-activating wallet");
            if let Err(e) = self.activate(connector).await {
                warn!(reason, error = %e, "re-activation failed");
            }
        }
    }

    async fn remember_connector(&self, id: &str) {
        if let Err(e) = self
            .sessions
            .backend()
            .set_item(CONNECTOR_MARKER_KEY, id)
            .await
        {
            debug!(error = %e, "failed to store connector marker");
        }
    }

    /// Provider every consumer should send through: the relay provider when
    /// a relay session is set, else the direct wallet's provider, else the
    /// read-only network provider.
    pub async fn library(&self) -> Arc<dyn RpcProvider> {
        let state = self.state.read().await;
        if let Some(link) = &state.relay {
            return link.provider.clone();
        }
        if let Some(direct) = &state.direct {
            return Arc::clone(&direct.provider);
        }
        Arc::clone(&self.network)
    }

    pub async fn relay_provider(&self) -> Option<Arc<TransactionRelayProvider>> {
        let state = self.state.read().await;
        state.relay.as_ref().map(|link| Arc::clone(&link.provider))
    }

    /// True while the direct wallet is authoritative.
    pub async fn active(&self) -> bool {
        let state = self.state.read().await;
        state.direct.is_some() && state.relay.is_none()
    }

    pub async fn phase(&self) -> ActivationPhase {
        self.state.read().await.phase
    }

    /// Relay contract account, once computed.
    pub async fn account(&self) -> Option<String> {
        self.state.read().await.account.clone()
    }

    /// Relay account when there is one, otherwise the direct address.
    pub async fn effective_account(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .account
            .clone()
            .or_else(|| state.direct.as_ref().map(|d| d.address.clone()))
    }

    pub async fn direct_address(&self) -> Option<String> {
        let state = self.state.read().await;
        state.direct.as_ref().map(|d| d.address.clone())
    }

    /// Chain the direct wallet is connected to.
    pub async fn chain_id(&self) -> Option<u64> {
        let state = self.state.read().await;
        state.direct.as_ref().map(|d| d.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use relay_gateway::memory::contract_account_for;
    use relay_gateway::{MemoryGatewayFactory, NotificationStream};
    use relay_store::SessionState;
    use relay_types::{Hex, RelayError};
    use serde_json::{json, Value};

    const OWNER: &str = "0x1111111111111111111111111111111111111111";

    struct NamedRpc(&'static str);

    #[async_trait]
    impl RpcProvider for NamedRpc {
        async fn send(&self, _method: &str, _params: Vec<Value>) -> Result<Value> {
            Ok(json!(self.0))
        }
    }

    struct Signer;

    #[async_trait]
    impl RelayWalletProvider for Signer {
        fn address(&self) -> &str {
            OWNER
        }

        async fn sign_message(&self, _message: &str) -> Result<Hex> {
            Ok("0xsig".into())
        }
    }

    struct FakeConnector {
        kind: ConnectorKind,
        chain_id: AtomicU64,
        authorized: bool,
        fail_activate: bool,
        reject_relay: bool,
        activations: AtomicUsize,
        deactivated: AtomicBool,
    }

    impl FakeConnector {
        fn new(kind: ConnectorKind, chain_id: u64) -> Self {
            Self {
                kind,
                chain_id: AtomicU64::new(chain_id),
                authorized: false,
                fail_activate: false,
                reject_relay: false,
                activations: AtomicUsize::new(0),
                deactivated: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        fn id(&self) -> &str {
            "fake"
        }

        fn kind(&self) -> ConnectorKind {
            self.kind
        }

        async fn activate(&self) -> Result<DirectWallet> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.fail_activate {
                return Err(RelayError::UserRejected);
            }
            Ok(DirectWallet {
                chain_id: self.chain_id.load(Ordering::SeqCst),
                address: OWNER.into(),
                provider: Arc::new(NamedRpc("direct")),
            })
        }

        async fn deactivate(&self) {
            self.deactivated.store(true, Ordering::SeqCst);
        }

        async fn is_authorized(&self) -> bool {
            self.authorized
        }

        async fn relay_wallet(&self) -> Result<Arc<dyn RelayWalletProvider>> {
            if self.reject_relay {
                Err(RelayError::UserRejected)
            } else {
                Ok(Arc::new(Signer))
            }
        }
    }

    fn context(factory: Arc<MemoryGatewayFactory>, sessions: SessionStore) -> WalletContext {
        WalletContext::new(RelayConfig::default(), sessions, factory)
            .with_network_provider(Arc::new(NamedRpc("network")))
    }

    async fn library_name(ctx: &WalletContext) -> Value {
        ctx.library().await.send("eth_chainId", vec![]).await.unwrap()
    }

    #[tokio::test]
    async fn test_relay_chain_never_relays() {
        for chain_id in [56, 97] {
            let factory = Arc::new(MemoryGatewayFactory::new());
            let ctx = context(factory.clone(), SessionStore::in_memory());
            let connector = Arc::new(FakeConnector::new(ConnectorKind::Injected, chain_id));

            ctx.activate(connector).await.unwrap();
            assert_eq!(ctx.phase().await, ActivationPhase::DirectActive);
            assert!(ctx.active().await);
            assert!(ctx.relay_provider().await.is_none());
            assert!(factory.opened().is_empty());
            assert_eq!(library_name(&ctx).await, json!("direct"));
        }
    }

    #[tokio::test]
    async fn test_eligible_connector_upgrades_to_relay() {
        let factory = Arc::new(MemoryGatewayFactory::new());
        let sessions = SessionStore::in_memory();
        let ctx = context(factory.clone(), sessions.clone());
        let connector = Arc::new(FakeConnector::new(ConnectorKind::Injected, 1));

        ctx.activate(connector).await.unwrap();
        let account = contract_account_for(OWNER);
        assert_eq!(ctx.phase().await, ActivationPhase::RelayActive);
        assert!(!ctx.active().await);
        assert_eq!(ctx.account().await.as_deref(), Some(account.as_str()));
        assert_eq!(ctx.effective_account().await.as_deref(), Some(account.as_str()));
        assert!(ctx.relay_provider().await.is_some());
        assert!(matches!(sessions.inspect(&account).await, SessionState::Active(_)));
        // Non-transaction calls on the relay provider go to the network.
        assert_eq!(library_name(&ctx).await, json!("network"));
    }

    #[tokio::test]
    async fn test_declined_or_unsupported_stays_direct() {
        let factory = Arc::new(MemoryGatewayFactory::new());
        let ctx = context(factory.clone(), SessionStore::in_memory());

        let mut declined = FakeConnector::new(ConnectorKind::Injected, 1);
        declined.reject_relay = true;
        ctx.activate(Arc::new(declined)).await.unwrap();
        assert_eq!(ctx.phase().await, ActivationPhase::DirectActive);
        assert!(ctx.active().await);

        ctx.activate(Arc::new(FakeConnector::new(ConnectorKind::Other, 1)))
            .await
            .unwrap();
        assert!(ctx.active().await);
        assert!(factory.opened().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failures_degrade() {
        let ctx = context(
            Arc::new(MemoryGatewayFactory::unreachable()),
            SessionStore::in_memory(),
        );
        ctx.activate(Arc::new(FakeConnector::new(ConnectorKind::WalletConnect, 1)))
            .await
            .unwrap();
        assert!(ctx.active().await);
        assert_eq!(library_name(&ctx).await, json!("direct"));

        let factory = Arc::new(MemoryGatewayFactory::without_accounts());
        let ctx = context(factory.clone(), SessionStore::in_memory());
        ctx.activate(Arc::new(FakeConnector::new(ConnectorKind::WalletConnect, 1)))
            .await
            .unwrap();
        assert_eq!(ctx.phase().await, ActivationPhase::DirectActive);
        assert!(ctx.active().await);
        assert!(ctx.relay_provider().await.is_none());
        assert_eq!(library_name(&ctx).await, json!("direct"));
        assert!(ctx.account().await.is_none());
        assert_eq!(ctx.effective_account().await.as_deref(), Some(OWNER));
        assert!(factory.last_opened().unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_failed_connection_resets() {
        let ctx = context(Arc::new(MemoryGatewayFactory::new()), SessionStore::in_memory());
        let mut connector = FakeConnector::new(ConnectorKind::Injected, 1);
        connector.fail_activate = true;

        assert!(ctx.activate(Arc::new(connector)).await.is_err());
        assert_eq!(ctx.phase().await, ActivationPhase::Disconnected);
        assert!(!ctx.active().await);
        assert_eq!(library_name(&ctx).await, json!("network"));
    }

    #[tokio::test]
    async fn test_deactivate_clears_and_destroys() {
        let factory = Arc::new(MemoryGatewayFactory::new());
        let sessions = SessionStore::in_memory();
        let ctx = context(factory.clone(), sessions.clone());
        let connector = Arc::new(FakeConnector::new(ConnectorKind::Injected, 1));

        ctx.activate(connector.clone()).await.unwrap();
        let gateway = factory.last_opened().unwrap();
        let account = ctx.account().await.unwrap();
        let mut sub = gateway.hub().subscribe();

        ctx.deactivate().await;
        assert!(connector.deactivated.load(Ordering::SeqCst));
        assert!(gateway.is_destroyed());
        assert!(sub.next().await.is_none());
        assert!(matches!(sessions.inspect(&account).await, SessionState::Cleared));
        assert_eq!(ctx.phase().await, ActivationPhase::Disconnected);
        assert!(ctx.account().await.is_none());
        assert_eq!(library_name(&ctx).await, json!("network"));
        assert_eq!(
            sessions.backend().get_item(CONNECTOR_MARKER_KEY).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_eager_connect_needs_marker_and_authorization() {
        let sessions = SessionStore::in_memory();
        let factory = Arc::new(MemoryGatewayFactory::new());

        let mut connector = FakeConnector::new(ConnectorKind::Injected, 56);
        connector.authorized = true;
        let connector = Arc::new(connector);

        let ctx = context(factory.clone(), sessions.clone());
        assert!(!ctx.eager_connect(connector.clone()).await);
        assert_eq!(connector.activations.load(Ordering::SeqCst), 0);

        ctx.activate(connector.clone()).await.unwrap();

        // A later run sharing the same storage.
        let restored = context(factory, sessions);
        assert!(restored.eager_connect(connector.clone()).await);
        assert_eq!(restored.phase().await, ActivationPhase::DirectActive);

        let stranger = Arc::new(FakeConnector::new(ConnectorKind::Injected, 56));
        assert!(!restored.eager_connect(stranger).await);
    }

    #[tokio::test]
    async fn test_chain_change_reactivates() {
        let factory = Arc::new(MemoryGatewayFactory::new());
        let ctx = context(factory.clone(), SessionStore::in_memory());
        let connector = Arc::new(FakeConnector::new(ConnectorKind::Injected, 1));

        ctx.activate(connector.clone()).await.unwrap();
        let first = factory.last_opened().unwrap();
        assert_eq!(ctx.phase().await, ActivationPhase::RelayActive);

        connector.chain_id.store(97, Ordering::SeqCst);
        ctx.on_chain_changed().await;
        assert!(first.is_destroyed());
        assert_eq!(ctx.phase().await, ActivationPhase::DirectActive);
        assert_eq!(ctx.chain_id().await, Some(97));

        ctx.on_accounts_changed(&[]).await;
        assert_eq!(connector.activations.load(Ordering::SeqCst), 2);
        ctx.on_accounts_changed(&[OWNER.to_string()]).await;
        assert_eq!(connector.activations.load(Ordering::SeqCst), 3);
    }
}
