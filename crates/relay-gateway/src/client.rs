//! HTTP client for the relay gateway service.
//!
//! Endpoints:
//! - POST /v1/accounts/compute
//! - GET  /v1/sessions/challenge?account=<account>
//! - POST /v1/sessions
//! - POST /v1/batches/estimate
//! - POST /v1/batches
//! - GET  /v1/batches/<batch_hash>
//!
//! The pending batch is accumulated client-side and sent whole on estimate
//! and submit.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GatewayBatchClient;
use relay_store::WalletSession;
use relay_types::{
    BatchEstimate, RelayError, Result, SubmitBatchResponse, SubmittedBatch, TransactionIntent,
};

/// Gateway API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse<T> {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct ComputedAccount {
    address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionChallenge {
    message: String,
}

#[derive(Debug, Clone)]
struct Auth {
    account: String,
    token: String,
}

/// Gateway client for one relay account.
pub struct HttpGatewayClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    auth: Mutex<Option<Auth>>,
    batch: Mutex<Vec<TransactionIntent>>,
}

impl HttpGatewayClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            auth: Mutex::new(None),
            batch: Mutex::new(Vec::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Compute the contract account address owned by `owner`.
    ///
    /// POST /v1/accounts/compute
    pub async fn compute_account(&self, owner: &str, network: &str, sync: bool) -> Result<String> {
        let body = serde_json::json!({
            "owner": owner,
            "network": network,
            "sync": sync,
        });
        let account: ComputedAccount = self.post("/v1/accounts/compute", &body).await?;
        Ok(account.address)
    }

    /// Fetch the message the account owner must sign to open a session.
    ///
    /// GET /v1/sessions/challenge?account=<account>
    pub async fn session_challenge(&self, account: &str) -> Result<String> {
        let challenge: SessionChallenge = self
            .get("/v1/sessions/challenge", &[("account", account)])
            .await?;
        Ok(challenge.message)
    }

    /// Exchange a signed challenge for a session.
    ///
    /// POST /v1/sessions
    pub async fn create_session(
        &self,
        account: &str,
        message: &str,
        signature: &str,
    ) -> Result<WalletSession> {
        let body = serde_json::json!({
            "account": account,
            "message": message,
            "signature": signature,
        });
        self.post("/v1/sessions", &body).await
    }

    /// Use `session` for every subsequent batch call made for `account`.
    pub fn authenticate(&self, account: &str, session: &WalletSession) {
        if let Ok(mut auth) = self.auth.lock() {
            *auth = Some(Auth {
                account: account.to_string(),
                token: session.token.clone(),
            });
        }
    }

    pub fn account(&self) -> Option<String> {
        self.auth.lock().ok()?.as_ref().map(|a| a.account.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.auth.lock().ok()?.as_ref().map(|a| a.token.clone())
    }

    /// Forget the session and any pending intents.
    pub fn reset(&self) {
        if let Ok(mut auth) = self.auth.lock() {
            *auth = None;
        }
        if let Ok(mut batch) = self.batch.lock() {
            batch.clear();
        }
    }

    pub fn pending_transactions(&self) -> Vec<TransactionIntent> {
        self.batch.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn batch_body(&self) -> Result<serde_json::Value> {
        let account = self.account().ok_or(RelayError::NotConnected)?;
        Ok(serde_json::json!({
            "account": account,
            "transactions": self.pending_transactions(),
        }))
    }

    fn get_request(&self, path: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url).query(query).timeout(self.timeout);
        if let Some(token) = self.token() {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .get_request(path, query)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("gateway request failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body).timeout(self.timeout);
        if let Some(token) = self.token() {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("gateway request failed: {}", e)))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!(
                "gateway returned status {}: {}",
                status, body
            )));
        }

        let body: GatewayResponse<T> = resp
            .json()
            .await
            .map_err(|e| RelayError::Transport(format!("failed to parse gateway response: {}", e)))?;

        body.data.ok_or_else(|| {
            RelayError::Transport(
                body.message
                    .unwrap_or_else(|| "gateway response carried no data".to_string()),
            )
        })
    }
}

#[async_trait]
impl GatewayBatchClient for HttpGatewayClient {
    async fn clear_batch(&self) -> Result<()> {
        if let Ok(mut batch) = self.batch.lock() {
            batch.clear();
        }
        Ok(())
    }

    async fn add_transaction(&self, intent: &TransactionIntent) -> Result<()> {
        let mut batch = self
            .batch
            .lock()
            .map_err(|_| RelayError::Other("batch lock poisoned".into()))?;
        batch.push(intent.clone());
        Ok(())
    }

    /// POST /v1/batches/estimate
    async fn estimate_batch(&self) -> Result<BatchEstimate> {
        let body = self.batch_body()?;
        self.post("/v1/batches/estimate", &body).await
    }

    /// POST /v1/batches
    async fn submit_batch(&self) -> Result<SubmitBatchResponse> {
        let body = self.batch_body()?;
        let submitted: SubmitBatchResponse = self.post("/v1/batches", &body).await?;
        if submitted.batch_hash.is_some() {
            debug!(batch_hash = ?submitted.batch_hash, "batch accepted by gateway");
            self.clear_batch().await?;
        }
        Ok(submitted)
    }

    /// GET /v1/batches/<batch_hash>
    async fn get_submitted_batch(&self, batch_hash: &str) -> Result<SubmittedBatch> {
        self.get(&format!("/v1/batches/{}", batch_hash), &[]).await
    }
}
