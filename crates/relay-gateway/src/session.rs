//! Gateway session over HTTP + websocket.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::client::HttpGatewayClient;
use crate::notifications::NotificationHub;
use crate::{GatewayBatchClient, GatewayFactory, GatewaySession, NotificationStream, RelayWalletProvider};
use relay_store::SessionStore;
use relay_types::{NotificationEvent, RelayError, Result};

/// Gateway endpoints and network selection.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub gateway_url: String,
    /// Websocket endpoint for push notifications. Without it the session
    /// only receives events published into its hub by the embedder.
    #[serde(default)]
    pub notifications_url: Option<String>,
    pub network: String,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

pub struct HttpGatewaySession {
    config: GatewayConfig,
    client: Arc<HttpGatewayClient>,
    hub: Arc<NotificationHub>,
    wallet: Arc<dyn RelayWalletProvider>,
    sessions: SessionStore,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl HttpGatewaySession {
    pub fn new(
        config: GatewayConfig,
        wallet: Arc<dyn RelayWalletProvider>,
        sessions: SessionStore,
    ) -> Self {
        let client = HttpGatewayClient::new(&config.gateway_url, config.request_timeout_ms);
        Self {
            config,
            client: Arc::new(client),
            hub: Arc::new(NotificationHub::new()),
            wallet,
            sessions,
            listener: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    pub fn client(&self) -> Arc<HttpGatewayClient> {
        Arc::clone(&self.client)
    }

    /// Restore the stored session for `account`, or sign a fresh challenge
    /// and persist the result.
    async fn authenticate(&self, account: &str) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if let Some(session) = self.sessions.load(account).await {
            if !session.is_expired(now) {
                debug!(account, "restored gateway session");
                self.client.authenticate(account, &session);
                return Ok(());
            }
        }

        let message = self.client.session_challenge(account).await?;
        let signature = self.wallet.sign_message(&message).await?;
        let session = self.client.create_session(account, &message, &signature).await?;

        if let Err(e) = self.sessions.save(account, &session).await {
            warn!(account, error = %e, "failed to persist gateway session");
        }
        self.client.authenticate(account, &session);
        info!(account, "gateway session created");
        Ok(())
    }

    /// Connect the notification websocket if configured and not yet running.
    async fn listen(&self) -> Result<()> {
        let Some(base) = self.config.notifications_url.as_deref() else {
            return Ok(());
        };
        if self.hub.is_closed() {
            return Err(RelayError::SessionClosed);
        }
        if let Ok(listener) = self.listener.lock() {
            if listener.as_ref().is_some_and(|h| !h.is_finished()) {
                return Ok(());
            }
        }

        let ws_url = notifications_endpoint(base, self.client.token().as_deref())?;

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| RelayError::Transport(format!("notification websocket failed: {}", e)))?;

        info!(url = %base, "connected to gateway notifications");

        let (_write, read) = ws_stream.split();
        let handle = tokio::spawn(forward_notifications(read, Arc::clone(&self.hub)));

        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(handle);
        }
        Ok(())
    }
}

/// Websocket URL for `base`, with the session token as an encoded query
/// parameter.
fn notifications_endpoint(base: &str, token: Option<&str>) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| RelayError::Transport(format!("invalid notifications url: {}", e)))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url.into())
}

/// Publish text frames from `read` into `hub` until the socket ends. The hub
/// is closed afterwards so pending waiters fail instead of hanging.
async fn forward_notifications<S>(mut read: S, hub: Arc<NotificationHub>)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<NotificationEvent>(&text) {
                Ok(event) => {
                    hub.publish(event);
                }
                Err(e) => debug!(error = %e, "ignoring unparsable notification"),
            },
            Ok(Message::Close(_)) => {
                info!("gateway notifications closed by server");
                break;
            }
            Err(e) => {
                error!(error = %e, "gateway notification websocket error");
                break;
            }
            _ => {}
        }
    }
    warn!("gateway notification listener stopped, closing session stream");
    hub.close();
}

#[async_trait]
impl GatewaySession for HttpGatewaySession {
    fn batch_client(&self) -> Arc<dyn GatewayBatchClient> {
        self.client.clone()
    }

    fn notifications(&self) -> Arc<dyn NotificationStream> {
        self.hub.clone()
    }

    /// POST /v1/accounts/compute, then authenticate and subscribe when `sync`.
    async fn compute_contract_account(&self, sync: bool) -> Result<String> {
        if self.hub.is_closed() {
            return Err(RelayError::SessionClosed);
        }
        let account = self
            .client
            .compute_account(self.wallet.address(), &self.config.network, sync)
            .await?;

        if sync {
            self.authenticate(&account).await?;
            self.listen().await?;
        }
        Ok(account)
    }

    async fn destroy(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        self.hub.close();
        self.client.reset();
        debug!(owner = self.wallet.address(), "gateway session destroyed");
    }
}

/// Opens `HttpGatewaySession`s from a shared `GatewayConfig`.
pub struct HttpGatewayFactory {
    config: GatewayConfig,
}

impl HttpGatewayFactory {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GatewayFactory for HttpGatewayFactory {
    async fn open(
        &self,
        wallet: Arc<dyn RelayWalletProvider>,
        sessions: SessionStore,
    ) -> Result<Arc<dyn GatewaySession>> {
        Ok(Arc::new(HttpGatewaySession::new(self.config.clone(), wallet, sessions)))
    }
}
