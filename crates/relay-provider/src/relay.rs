//! Relay provider: runs `eth_sendTransaction` through a gateway batch.
//!
//! Per call: clear batch -> add intent -> estimate -> submit -> subscribe.
//! Every "batch updated" notification triggers one status fetch for the
//! submitted hash; the first failure state or final hash settles the call and
//! the subscription is released.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EstimatePolicy, ProviderConfig};
use crate::json_rpc::JsonRpcProvider;
use crate::{RpcProvider, SEND_TRANSACTION};
use relay_gateway::{GatewayBatchClient, NotificationStream, Subscription};
use relay_types::{Hex, RelayError, Result, SubmittedBatch, TransactionIntent};

pub struct TransactionRelayProvider {
    passthrough: Arc<dyn RpcProvider>,
    gateway: Arc<dyn GatewayBatchClient>,
    notifications: Arc<dyn NotificationStream>,
    config: ProviderConfig,
    // One batch per provider at a time.
    batch_lock: Mutex<()>,
}

impl TransactionRelayProvider {
    /// Relay provider whose non-transaction calls go to `network_url`.
    pub fn new(
        network_url: &str,
        gateway: Arc<dyn GatewayBatchClient>,
        notifications: Arc<dyn NotificationStream>,
        config: ProviderConfig,
    ) -> Self {
        let passthrough = Arc::new(JsonRpcProvider::new(network_url, None));
        Self::with_passthrough(passthrough, gateway, notifications, config)
    }

    pub fn with_passthrough(
        passthrough: Arc<dyn RpcProvider>,
        gateway: Arc<dyn GatewayBatchClient>,
        notifications: Arc<dyn NotificationStream>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            passthrough,
            gateway,
            notifications,
            config,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Execute `intent` as a single-transaction gateway batch and wait for
    /// its on-chain hash.
    pub async fn relay_transaction(&self, intent: TransactionIntent) -> Result<Hex> {
        let _batch = self.batch_lock.lock().await;

        self.gateway.clear_batch().await?;
        self.gateway.add_transaction(&intent).await?;

        match self.gateway.estimate_batch().await {
            Ok(estimate) => info!(
                to = %intent.to,
                estimated_gas = ?estimate.estimated_gas,
                fee_amount = ?estimate.fee_amount,
                "batch estimated"
            ),
            Err(e) if self.config.estimate_policy == EstimatePolicy::Require => {
                return Err(RelayError::EstimateFailed(e.to_string()));
            }
            Err(e) => warn!(to = %intent.to, error = %e, "batch estimation failed, submitting anyway"),
        }

        let batch_hash = self
            .gateway
            .submit_batch()
            .await?
            .batch_hash
            .filter(|hash| !hash.is_empty())
            .ok_or(RelayError::SubmissionFailed)?;

        info!(batch_hash = %batch_hash, "batch submitted");

        let mut subscription = self.notifications.subscribe();
        let outcome = match self.config.confirmation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.await_outcome(&mut subscription, &batch_hash))
                .await
                .unwrap_or_else(|_| {
                    Err(RelayError::ConfirmationTimeout {
                        batch_hash: batch_hash.clone(),
                        waited_secs: limit.as_secs(),
                    })
                }),
            None => self.await_outcome(&mut subscription, &batch_hash).await,
        };
        subscription.unsubscribe();

        match &outcome {
            Ok(hash) => info!(batch_hash = %batch_hash, tx_hash = %hash, "batch confirmed"),
            Err(e) => warn!(batch_hash = %batch_hash, error = %e, "batch did not confirm"),
        }
        outcome
    }

    async fn await_outcome(&self, subscription: &mut Subscription, batch_hash: &str) -> Result<Hex> {
        while let Some(event) = subscription.next().await {
            if !event.is_batch_update() {
                continue;
            }
            if let Some(hash) = event.batch_hash.as_deref() {
                if hash != batch_hash {
                    continue;
                }
            }

            let batch = self.gateway.get_submitted_batch(batch_hash).await?;
            debug!(batch_hash, state = ?batch.transaction_state, "batch updated");

            if let Some(outcome) = settle(&batch) {
                return outcome;
            }
        }
        Err(RelayError::SessionClosed)
    }
}

/// Failure states win over a final hash; anything else keeps waiting.
fn settle(batch: &SubmittedBatch) -> Option<Result<Hex>> {
    if let Some(state) = batch.transaction_state.filter(|s| s.is_failure()) {
        return Some(Err(RelayError::TransactionFailed(state)));
    }
    batch
        .final_transaction_hash
        .as_ref()
        .filter(|hash| !hash.is_empty())
        .map(|hash| Ok(hash.clone()))
}

fn parse_intent(params: &[Value]) -> Result<TransactionIntent> {
    let tx = params.first().cloned().ok_or_else(|| {
        RelayError::Serialization(format!("{} expects a transaction object", SEND_TRANSACTION))
    })?;
    Ok(serde_json::from_value(tx)?)
}

#[async_trait]
impl RpcProvider for TransactionRelayProvider {
    async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        if method == SEND_TRANSACTION {
            let intent = parse_intent(&params)?;
            return self.relay_transaction(intent).await.map(Value::String);
        }
        self.passthrough.send(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_gateway::NotificationHub;
    use relay_types::{
        BatchEstimate, NotificationEvent, NotificationType, SubmitBatchResponse, TransactionState,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const BATCH: &str = "0xbatch01";

    #[derive(Default)]
    struct MockGateway {
        calls: StdMutex<Vec<String>>,
        pending: StdMutex<Vec<TransactionIntent>>,
        submit_hash: StdMutex<Option<String>>,
        estimate_fails: bool,
        statuses: StdMutex<VecDeque<SubmittedBatch>>,
    }

    impl MockGateway {
        fn new(statuses: Vec<SubmittedBatch>) -> Self {
            Self {
                submit_hash: StdMutex::new(Some(BATCH.into())),
                statuses: StdMutex::new(statuses.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl GatewayBatchClient for MockGateway {
        async fn clear_batch(&self) -> Result<()> {
            self.record("clear");
            self.pending.lock().unwrap().clear();
            Ok(())
        }

        async fn add_transaction(&self, intent: &TransactionIntent) -> Result<()> {
            self.record("add");
            self.pending.lock().unwrap().push(intent.clone());
            Ok(())
        }

        async fn estimate_batch(&self) -> Result<BatchEstimate> {
            self.record("estimate");
            if self.estimate_fails {
                return Err(RelayError::Transport("estimate unavailable".into()));
            }
            Ok(BatchEstimate::default())
        }

        async fn submit_batch(&self) -> Result<SubmitBatchResponse> {
            self.record("submit");
            Ok(SubmitBatchResponse {
                batch_hash: self.submit_hash.lock().unwrap().clone(),
            })
        }

        async fn get_submitted_batch(&self, batch_hash: &str) -> Result<SubmittedBatch> {
            self.record("status");
            assert_eq!(batch_hash, BATCH);
            let mut statuses = self.statuses.lock().unwrap();
            Ok(statuses.pop_front().unwrap_or_else(pending_status))
        }
    }

    /// Counts every subscription ever opened.
    struct CountingStream {
        hub: NotificationHub,
        opened: AtomicUsize,
    }

    impl NotificationStream for CountingStream {
        fn subscribe(&self) -> Subscription {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.hub.subscribe()
        }

        fn active_subscriptions(&self) -> usize {
            self.hub.active_subscriptions()
        }
    }

    struct RecordingRpc {
        methods: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcProvider for RecordingRpc {
        async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value> {
            self.methods.lock().unwrap().push(method.to_string());
            Ok(serde_json::json!({ "method": method, "params": params }))
        }
    }

    fn pending_status() -> SubmittedBatch {
        SubmittedBatch {
            batch_hash: BATCH.into(),
            transaction_state: Some(TransactionState::Sent),
            final_transaction_hash: None,
        }
    }

    fn status(state: TransactionState, hash: Option<&str>) -> SubmittedBatch {
        SubmittedBatch {
            batch_hash: BATCH.into(),
            transaction_state: Some(state),
            final_transaction_hash: hash.map(String::from),
        }
    }

    struct Harness {
        gateway: Arc<MockGateway>,
        stream: Arc<CountingStream>,
        rpc: Arc<RecordingRpc>,
        provider: Arc<TransactionRelayProvider>,
    }

    fn harness(gateway: MockGateway, config: ProviderConfig) -> Harness {
        let gateway = Arc::new(gateway);
        let stream = Arc::new(CountingStream {
            hub: NotificationHub::new(),
            opened: AtomicUsize::new(0),
        });
        let rpc = Arc::new(RecordingRpc {
            methods: StdMutex::new(Vec::new()),
        });
        let provider = Arc::new(TransactionRelayProvider::with_passthrough(
            rpc.clone(),
            gateway.clone(),
            stream.clone(),
            config,
        ));
        Harness { gateway, stream, rpc, provider }
    }

    fn send_tx(provider: &Arc<TransactionRelayProvider>) -> tokio::task::JoinHandle<Result<Value>> {
        let provider = Arc::clone(provider);
        tokio::spawn(async move {
            provider
                .send(
                    SEND_TRANSACTION,
                    vec![serde_json::json!({
                        "from": "0xfrom",
                        "to": "0xdeposit",
                        "value": "0x0de0b6b3a7640000",
                    })],
                )
                .await
        })
    }

    async fn wait_for_subscriber(stream: &CountingStream) {
        for _ in 0..500 {
            if stream.active_subscriptions() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("provider never subscribed");
    }

    #[tokio::test]
    async fn test_resolves_with_final_hash() {
        let h = harness(
            MockGateway::new(vec![
                pending_status(),
                status(TransactionState::Sent, Some("0xfinal")),
            ]),
            ProviderConfig::default(),
        );

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;

        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));
        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));

        let hash = call.await.unwrap().unwrap();
        assert_eq!(hash, Value::String("0xfinal".into()));
        assert_eq!(h.stream.active_subscriptions(), 0);
        assert_eq!(
            h.gateway.calls(),
            vec!["clear", "add", "estimate", "submit", "status", "status"]
        );
        let pending = h.gateway.pending.lock().unwrap().clone();
        assert_eq!(
            pending,
            vec![TransactionIntent::new("0xdeposit").with_value("0x0de0b6b3a7640000")]
        );
    }

    #[tokio::test]
    async fn test_reverted_fails_and_later_events_are_ignored() {
        let h = harness(
            MockGateway::new(vec![status(TransactionState::Reverted, None)]),
            ProviderConfig::default(),
        );

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;
        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::TransactionFailed(TransactionState::Reverted)));
        assert_eq!(h.stream.active_subscriptions(), 0);

        assert_eq!(h.stream.hub.publish(NotificationEvent::batch_updated(BATCH)), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.gateway.calls().iter().filter(|c| *c == "status").count(), 1);
    }

    #[tokio::test]
    async fn test_failure_state_wins_over_hash() {
        let h = harness(
            MockGateway::new(vec![status(TransactionState::Canceling, Some("0xfinal"))]),
            ProviderConfig::default(),
        );

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;
        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Canceling");
    }

    #[tokio::test]
    async fn test_missing_batch_hash_never_subscribes() {
        let gateway = MockGateway::new(vec![]);
        *gateway.submit_hash.lock().unwrap() = None;
        let h = harness(gateway, ProviderConfig::default());

        let err = send_tx(&h.provider).await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::SubmissionFailed));
        assert_eq!(h.stream.opened.load(Ordering::SeqCst), 0);
        assert_eq!(h.gateway.calls(), vec!["clear", "add", "estimate", "submit"]);
    }

    #[tokio::test]
    async fn test_empty_batch_hash_is_a_submission_failure() {
        let gateway = MockGateway::new(vec![]);
        *gateway.submit_hash.lock().unwrap() = Some(String::new());
        let h = harness(gateway, ProviderConfig::default());

        let err = send_tx(&h.provider).await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::SubmissionFailed));
    }

    #[tokio::test]
    async fn test_other_events_do_not_trigger_status_fetch() {
        let h = harness(
            MockGateway::new(vec![status(TransactionState::Confirmed, Some("0xfinal"))]),
            ProviderConfig::default(),
        );

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;

        h.stream.hub.publish(NotificationEvent {
            kind: NotificationType::Unknown,
            batch_hash: Some(BATCH.into()),
        });
        h.stream.hub.publish(NotificationEvent::batch_updated("0xsomeoneelse"));
        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));

        assert_eq!(call.await.unwrap().unwrap(), Value::String("0xfinal".into()));
        assert_eq!(h.gateway.calls().iter().filter(|c| *c == "status").count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_releases_subscription() {
        let config = ProviderConfig {
            confirmation_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let h = harness(MockGateway::new(vec![]), config);

        let err = send_tx(&h.provider).await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::ConfirmationTimeout { .. }));
        assert_eq!(h.stream.opened.load(Ordering::SeqCst), 1);
        assert_eq!(h.stream.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_closed_stream_fails_with_session_closed() {
        let h = harness(MockGateway::new(vec![]), ProviderConfig::default());

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;
        h.stream.hub.close();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::SessionClosed));
        assert_eq!(h.stream.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_estimate_failure_policy() {
        let gateway = MockGateway {
            estimate_fails: true,
            ..MockGateway::new(vec![])
        };
        let config = ProviderConfig {
            estimate_policy: EstimatePolicy::Require,
            ..Default::default()
        };
        let h = harness(gateway, config);

        let err = send_tx(&h.provider).await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::EstimateFailed(_)));
        assert_eq!(h.gateway.calls(), vec!["clear", "add", "estimate"]);
    }

    #[tokio::test]
    async fn test_estimate_failure_is_observed_by_default() {
        let gateway = MockGateway {
            estimate_fails: true,
            ..MockGateway::new(vec![status(TransactionState::Sent, Some("0xfinal"))])
        };
        let h = harness(gateway, ProviderConfig::default());

        let call = send_tx(&h.provider);
        wait_for_subscriber(&h.stream).await;
        h.stream.hub.publish(NotificationEvent::batch_updated(BATCH));

        assert_eq!(call.await.unwrap().unwrap(), Value::String("0xfinal".into()));
    }

    #[tokio::test]
    async fn test_other_methods_pass_through() {
        let h = harness(MockGateway::new(vec![]), ProviderConfig::default());

        let result = h
            .provider
            .send("eth_getBalance", vec![serde_json::json!("0xabc")])
            .await
            .unwrap();
        assert_eq!(result["method"], "eth_getBalance");
        assert_eq!(*h.rpc.methods.lock().unwrap(), vec!["eth_getBalance".to_string()]);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_transaction_requires_params() {
        let h = harness(MockGateway::new(vec![]), ProviderConfig::default());
        let err = h.provider.send(SEND_TRANSACTION, vec![]).await.unwrap_err();
        assert!(matches!(err, RelayError::Serialization(_)));
        assert!(h.gateway.calls().is_empty());
    }
}
