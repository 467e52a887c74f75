//! In-process gateway for testing and local development.
//!
//! Batches are kept in memory. Their state only changes when the embedder
//! calls `update_batch`, which also publishes the matching notification.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use crate::notifications::NotificationHub;
use crate::{
    GatewayBatchClient, GatewayFactory, GatewaySession, NotificationStream, RelayWalletProvider,
};
use relay_store::{SessionStore, WalletSession};
use relay_types::{
    bytes_to_hex, BatchEstimate, Hex, NotificationEvent, RelayError, Result, SubmitBatchResponse,
    SubmittedBatch, TransactionIntent, TransactionState,
};

/// Deterministic stand-in for the counterfactual account address.
pub fn contract_account_for(owner: &str) -> String {
    let digest = Keccak256::digest(owner.to_ascii_lowercase().as_bytes());
    bytes_to_hex(&digest[12..])
}

#[derive(Debug, Clone)]
struct StoredBatch {
    hash: Hex,
    transactions: Vec<TransactionIntent>,
    status: SubmittedBatch,
}

#[derive(Default)]
struct MemoryBatches {
    pending: Mutex<Vec<TransactionIntent>>,
    submitted: Mutex<Vec<StoredBatch>>,
    next_batch: AtomicU64,
    closed: AtomicBool,
}

fn poisoned<T>(_: T) -> RelayError {
    RelayError::Other("memory gateway lock poisoned".into())
}

impl MemoryBatches {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayBatchClient for MemoryBatches {
    async fn clear_batch(&self) -> Result<()> {
        self.pending.lock().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn add_transaction(&self, intent: &TransactionIntent) -> Result<()> {
        self.ensure_open()?;
        self.pending.lock().map_err(poisoned)?.push(intent.clone());
        Ok(())
    }

    async fn estimate_batch(&self) -> Result<BatchEstimate> {
        self.ensure_open()?;
        let count = self.pending.lock().map_err(poisoned)?.len() as u64;
        Ok(BatchEstimate {
            estimated_gas: Some(21_000 * count.max(1)),
            ..Default::default()
        })
    }

    async fn submit_batch(&self) -> Result<SubmitBatchResponse> {
        self.ensure_open()?;
        let transactions = std::mem::take(&mut *self.pending.lock().map_err(poisoned)?);
        if transactions.is_empty() {
            return Ok(SubmitBatchResponse { batch_hash: None });
        }

        let n = self.next_batch.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = format!("0x{:064x}", n);
        self.submitted.lock().map_err(poisoned)?.push(StoredBatch {
            hash: hash.clone(),
            transactions,
            status: SubmittedBatch {
                batch_hash: hash.clone(),
                transaction_state: Some(TransactionState::Queued),
                final_transaction_hash: None,
            },
        });
        Ok(SubmitBatchResponse {
            batch_hash: Some(hash),
        })
    }

    async fn get_submitted_batch(&self, batch_hash: &str) -> Result<SubmittedBatch> {
        self.submitted
            .lock()
            .map_err(poisoned)?
            .iter()
            .find(|b| b.hash == batch_hash)
            .map(|b| b.status.clone())
            .ok_or_else(|| RelayError::Transport(format!("batch {} not found", batch_hash)))
    }
}

/// Gateway session held entirely in process memory.
pub struct MemoryGateway {
    owner: String,
    account: String,
    sessions: SessionStore,
    batches: Arc<MemoryBatches>,
    hub: Arc<NotificationHub>,
    fail_account: bool,
}

impl MemoryGateway {
    pub fn new(owner: &str, sessions: SessionStore) -> Self {
        Self {
            owner: owner.to_string(),
            account: contract_account_for(owner),
            sessions,
            batches: Arc::new(MemoryBatches::default()),
            hub: Arc::new(NotificationHub::new()),
            fail_account: false,
        }
    }

    /// Make `compute_contract_account` fail with a transport error.
    pub fn with_failing_account(mut self) -> Self {
        self.fail_account = true;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    pub fn is_destroyed(&self) -> bool {
        self.batches.closed.load(Ordering::SeqCst)
    }

    /// Hash of the most recently submitted batch.
    pub fn last_batch_hash(&self) -> Option<Hex> {
        let submitted = self.batches.submitted.lock().ok()?;
        submitted.last().map(|b| b.hash.clone())
    }

    pub fn submitted_transactions(&self, batch_hash: &str) -> Option<Vec<TransactionIntent>> {
        let submitted = self.batches.submitted.lock().ok()?;
        submitted
            .iter()
            .find(|b| b.hash == batch_hash)
            .map(|b| b.transactions.clone())
    }

    /// Move a submitted batch to `state` and notify subscribers. Returns the
    /// number of subscribers that received the event.
    pub fn update_batch(
        &self,
        batch_hash: &str,
        state: TransactionState,
        final_transaction_hash: Option<&str>,
    ) -> Result<usize> {
        {
            let mut submitted = self.batches.submitted.lock().map_err(poisoned)?;
            let batch = submitted
                .iter_mut()
                .find(|b| b.hash == batch_hash)
                .ok_or_else(|| RelayError::Other(format!("unknown batch {}", batch_hash)))?;
            batch.status.transaction_state = Some(state);
            batch.status.final_transaction_hash = final_transaction_hash.map(String::from);
        }
        Ok(self.hub.publish(NotificationEvent::batch_updated(batch_hash)))
    }
}

#[async_trait]
impl GatewaySession for MemoryGateway {
    fn batch_client(&self) -> Arc<dyn GatewayBatchClient> {
        self.batches.clone()
    }

    fn notifications(&self) -> Arc<dyn NotificationStream> {
        self.hub.clone()
    }

    async fn compute_contract_account(&self, sync: bool) -> Result<String> {
        self.batches.ensure_open()?;
        if self.fail_account {
            return Err(RelayError::Transport("account service unavailable".into()));
        }
        if sync && self.sessions.load(&self.account).await.is_none() {
            let session = WalletSession::new(format!("memory-{}", self.account));
            self.sessions.save(&self.account, &session).await?;
        }
        Ok(self.account.clone())
    }

    async fn destroy(&self) {
        self.batches.closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.batches.pending.lock() {
            pending.clear();
        }
        self.hub.close();
    }
}

/// Opens [`MemoryGateway`] sessions and keeps a handle to each one.
#[derive(Default)]
pub struct MemoryGatewayFactory {
    opened: Mutex<Vec<Arc<MemoryGateway>>>,
    fail_open: bool,
    fail_account: bool,
}

impl MemoryGatewayFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` call fails.
    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Sessions open but cannot compute their contract account.
    pub fn without_accounts() -> Self {
        Self {
            fail_account: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<Arc<MemoryGateway>> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn last_opened(&self) -> Option<Arc<MemoryGateway>> {
        self.opened().pop()
    }
}

#[async_trait]
impl GatewayFactory for MemoryGatewayFactory {
    async fn open(
        &self,
        wallet: Arc<dyn RelayWalletProvider>,
        sessions: SessionStore,
    ) -> Result<Arc<dyn GatewaySession>> {
        if self.fail_open {
            return Err(RelayError::Transport("gateway unreachable".into()));
        }
        let mut gateway = MemoryGateway::new(wallet.address(), sessions);
        if self.fail_account {
            gateway = gateway.with_failing_account();
        }
        let gateway = Arc::new(gateway);
        self.opened.lock().map_err(poisoned)?.push(Arc::clone(&gateway));
        Ok(gateway)
    }
}
