//! Storage facade.
//!
//! The public entry point. Each call is validated, then either buffered in
//! the batch queue or dispatched directly. Dispatch runs the operation
//! through the retry executor against the primary backend, wrapped by the
//! fallback coordinator. Successful operations schedule a background quota
//! refresh.
//!
//! Per-backend attempt:
//! - transient failures are retried with backoff
//! - a quota rejection on a write skips retry, runs one eviction pass on
//!   that backend and tries exactly once more
//! - anything still failing is handed to the next tier in the chain

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pinmark_types::{Keys, QuotaThresholds, Records, StorageSettings, UsageSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, KeyValueStore, QuotaProbe, StorageEstimate, StorageOp};
use crate::batch::{BatchConfig, BatchDispatcher, BatchQueue, BatchResult};
use crate::error::StorageError;
use crate::eviction::EvictionPolicy;
use crate::fallback::{FallbackCoordinator, Served};
use crate::quota::{QuotaMonitor, QuotaObserver};
use crate::retry::{RetryExecutor, RetryFailure, RetryPolicy};

/// Lifecycle of one logical call, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Enqueued,
    Flushing,
    /// Attempt number on the primary backend, starting at 1
    Attempting(u32),
    Retrying,
    Exhausted,
    FallbackAttempting,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Enqueued => "enqueued",
            OperationState::Flushing => "flushing",
            OperationState::Attempting(_) => "attempting",
            OperationState::Retrying => "retrying",
            OperationState::Exhausted => "exhausted",
            OperationState::FallbackAttempting => "fallback_attempting",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Attempting(attempt) => write!(f, "attempting({attempt})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Probe used when none is wired: reports an unknown quota.
struct UnknownQuota;

#[async_trait]
impl QuotaProbe for UnknownQuota {
    async fn estimate(&self) -> Result<StorageEstimate, StorageError> {
        Ok(StorageEstimate::default())
    }
}

/// Retry, quota recovery and fallback for one operation.
struct Pipeline {
    coordinator: FallbackCoordinator,
    retry: RetryExecutor,
    eviction: EvictionPolicy,
    monitor: Arc<QuotaMonitor>,
}

impl Pipeline {
    async fn run(&self, op: StorageOp) -> BatchResult {
        let op = &op;
        self.coordinator
            .execute(|backend| async move { self.attempt(op, backend).await })
            .await
    }

    async fn attempt(
        &self,
        op: &StorageOp,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Records, StorageError> {
        let on_primary = backend.tier() == self.coordinator.primary().tier();
        let store = backend.as_ref();

        let error = match self.retry_on(op, store, on_primary).await {
            Ok(records) => return Ok(records),
            Err(e) => e,
        };

        if !(error.is_quota_exceeded() && op.is_write()) {
            debug!(
                kind = %op.kind(),
                backend = backend.name(),
                state = %OperationState::Exhausted,
                error = %error,
                "Operation failed on backend"
            );
            return Err(error);
        }

        warn!(
            backend = backend.name(),
            error = %error,
            "Write rejected for quota, evicting before one more attempt"
        );
        self.recover_quota(store).await;
        op.apply(store).await
    }

    /// Retry `op` on one backend, logging each attempt's state.
    async fn retry_on(
        &self,
        op: &StorageOp,
        store: &dyn KeyValueStore,
        on_primary: bool,
    ) -> Result<Records, StorageError> {
        let label = format!("{}:{}", op.kind(), store.name());
        let mut attempt = 0;
        self.retry
            .run_with(
                &label,
                self.retry.policy().max_attempts,
                StorageError::is_transient,
                move || {
                    attempt += 1;
                    if attempt > 1 {
                        debug!(
                            kind = %op.kind(),
                            backend = store.name(),
                            attempt,
                            state = %OperationState::Retrying,
                            "Retrying operation"
                        );
                    }
                    let state = if on_primary {
                        OperationState::Attempting(attempt)
                    } else {
                        OperationState::FallbackAttempting
                    };
                    debug!(
                        kind = %op.kind(),
                        backend = store.name(),
                        attempt,
                        state = %state,
                        "Running operation"
                    );
                    op.apply(store)
                },
            )
            .await
            .map_err(RetryFailure::into_inner)
    }

    async fn recover_quota(&self, store: &dyn KeyValueStore) {
        match self.eviction.evict(store).await {
            Ok(report) => info!(
                backend = store.name(),
                removed = report.removed_count(),
                "Quota recovery eviction finished"
            ),
            Err(e) => warn!(backend = store.name(), error = %e, "Quota recovery eviction failed"),
        }
        self.monitor.refresh_without_eviction().await;
    }

    fn refresh_in_background(&self, force: bool) {
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            monitor.get_usage(force).await;
        });
    }
}

#[async_trait]
impl BatchDispatcher for Pipeline {
    async fn dispatch(&self, op: StorageOp) -> BatchResult {
        debug!(kind = %op.kind(), state = %OperationState::Flushing, "Dispatching batched operation");
        self.run(op).await
    }

    /// Merged group calls only retry on the primary. A failure sends every
    /// member back through `dispatch` on its own.
    async fn dispatch_grouped(&self, op: StorageOp) -> BatchResult {
        let primary = Arc::clone(self.coordinator.primary());
        debug!(kind = %op.kind(), backend = primary.name(), state = %OperationState::Flushing, "Dispatching grouped operation");
        let records = self.retry_on(&op, primary.as_ref(), true).await?;
        Ok(Served::new(records, primary.as_ref(), false))
    }

    async fn after_flush(&self) {
        self.refresh_in_background(true);
    }
}

/// Builder for [`StorageFacade`].
pub struct StorageFacadeBuilder {
    registry: BackendRegistry,
    settings: StorageSettings,
    probe: Option<Arc<dyn QuotaProbe>>,
    thresholds: Option<QuotaThresholds>,
    eviction: Option<EvictionPolicy>,
    observers: Vec<Arc<dyn QuotaObserver>>,
}

impl StorageFacadeBuilder {
    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Storage-estimate primitive for the primary backend.
    pub fn with_probe(mut self, probe: Arc<dyn QuotaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Override the thresholds taken from settings, e.g. with
    /// `QuotaThresholds::for_tier`.
    pub fn with_thresholds(mut self, thresholds: QuotaThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction = Some(policy);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn QuotaObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<StorageFacade, StorageError> {
        let settings = self.settings;
        settings
            .validate()
            .map_err(|e| StorageError::Validation(format!("invalid settings: {e}")))?;

        let thresholds = self.thresholds.unwrap_or_else(|| settings.thresholds());
        thresholds
            .validate()
            .map_err(|e| StorageError::Validation(format!("invalid thresholds: {e}")))?;

        let coordinator = FallbackCoordinator::from_registry(
            &self.registry,
            settings.primary_tier,
            &settings.fallback_chain,
        )?;
        let retry = RetryExecutor::new(RetryPolicy::from_settings(&settings));
        let eviction = self
            .eviction
            .unwrap_or_else(|| EvictionPolicy::from_settings(&settings));
        let probe = self.probe.unwrap_or_else(|| Arc::new(UnknownQuota));

        let monitor = QuotaMonitor::new(probe)
            .with_thresholds(thresholds)
            .with_cache_ttl(settings.cache_timeout())
            .with_retry(retry.clone())
            .with_eviction(eviction.clone(), Arc::clone(coordinator.primary()));
        for observer in self.observers {
            monitor.add_observer(observer);
        }
        let monitor = Arc::new(monitor);

        info!(
            primary = coordinator.primary().name(),
            fallbacks = coordinator.chain().len(),
            batching = settings.enable_batching,
            "Storage facade ready"
        );

        let pipeline = Arc::new(Pipeline {
            coordinator,
            retry,
            eviction,
            monitor: Arc::clone(&monitor),
        });
        let queue = settings
            .enable_batching
            .then(|| BatchQueue::new(Arc::clone(&pipeline), BatchConfig::from_settings(&settings)));

        Ok(StorageFacade {
            pipeline,
            queue,
            monitor,
            settings,
        })
    }
}

/// Quota-aware, retrying, batching key-value store with tiered fallback.
pub struct StorageFacade {
    pipeline: Arc<Pipeline>,
    queue: Option<BatchQueue<Pipeline>>,
    monitor: Arc<QuotaMonitor>,
    settings: StorageSettings,
}

impl StorageFacade {
    pub fn builder(registry: BackendRegistry) -> StorageFacadeBuilder {
        StorageFacadeBuilder {
            registry,
            settings: StorageSettings::default(),
            probe: None,
            thresholds: None,
            eviction: None,
            observers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    /// Fetch `keys`. Missing keys are absent from the result.
    pub async fn get(&self, keys: impl Into<Keys>) -> Result<Served<Records>, StorageError> {
        let keys = validate_keys(keys.into())?;
        self.execute(StorageOp::Get(keys)).await
    }

    /// Write every entry.
    pub async fn set(&self, entries: Records) -> Result<Served<()>, StorageError> {
        validate_entries(&entries)?;
        Ok(self.execute(StorageOp::Set(entries)).await?.map(|_| ()))
    }

    /// Delete `keys`. Missing keys are ignored.
    pub async fn remove(&self, keys: impl Into<Keys>) -> Result<Served<()>, StorageError> {
        let keys = validate_keys(keys.into())?;
        Ok(self.execute(StorageOp::Remove(keys)).await?.map(|_| ()))
    }

    /// Fetch one key and decode it.
    pub async fn get_record<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Served<Option<T>>, StorageError> {
        let served = self.get(key).await?;
        let decoded = match served.value.get(key) {
            Some(value) => Some(serde_json::from_value(value.clone())?),
            None => None,
        };
        Ok(served.map(|_| decoded))
    }

    /// Encode `value` and store it under `key`.
    pub async fn set_record<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<Served<()>, StorageError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageError::Validation(format!("cannot encode {key}: {e}")))?;
        let mut entries = Records::new();
        entries.insert(key.to_string(), value);
        self.set(entries).await
    }

    /// Current quota usage of the primary backend. Never fails.
    pub async fn get_usage(&self, force_refresh: bool) -> Arc<UsageSnapshot> {
        self.monitor.get_usage(force_refresh).await
    }

    /// Flush the batch queue now. Returns the number of operations flushed.
    pub async fn flush(&self) -> usize {
        match &self.queue {
            Some(queue) => queue.flush().await,
            None => 0,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn QuotaObserver>) {
        self.monitor.add_observer(observer);
    }

    async fn execute(&self, op: StorageOp) -> BatchResult {
        let kind = op.kind();
        let result = match &self.queue {
            Some(queue) => {
                debug!(kind = %kind, state = %OperationState::Enqueued, "Queueing operation");
                queue.submit(op).await
            }
            None => {
                let result = self.pipeline.run(op).await;
                if result.is_ok() {
                    self.pipeline.refresh_in_background(false);
                }
                result
            }
        };

        match &result {
            Ok(served) => debug!(
                kind = %kind,
                state = %OperationState::Succeeded,
                tier = %served.tier,
                fallback_used = served.fallback_used,
                "Operation settled"
            ),
            Err(e) => warn!(kind = %kind, state = %OperationState::Failed, error = %e, "Operation settled"),
        }
        result
    }
}

fn validate_keys(keys: Keys) -> Result<Vec<String>, StorageError> {
    if keys.is_empty() {
        return Err(StorageError::Validation("no keys given".to_string()));
    }
    if keys.iter().any(|key| key.is_empty()) {
        return Err(StorageError::Validation("keys must not be empty".to_string()));
    }
    Ok(keys.into_vec())
}

fn validate_entries(entries: &Records) -> Result<(), StorageError> {
    if entries.is_empty() {
        return Err(StorageError::Validation("no entries given".to_string()));
    }
    if entries.keys().any(|key| key.is_empty()) {
        return Err(StorageError::Validation("keys must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OpKind;
    use crate::memory::InMemoryStore;
    use crate::mock::{MockStore, RecordingObserver};
    use pinmark_types::{BackendTier, QuotaLevel};
    use serde::Deserialize;
    use serde_json::json;

    fn direct() -> StorageSettings {
        StorageSettings {
            enable_batching: false,
            ..StorageSettings::default()
        }
    }

    fn one(key: &str, value: serde_json::Value) -> Records {
        let mut records = Records::new();
        records.insert(key.to_string(), value);
        records
    }

    fn facade_over(
        primary: &Arc<MockStore>,
        fallback: &Arc<MockStore>,
        settings: StorageSettings,
    ) -> StorageFacade {
        let registry = BackendRegistry::new()
            .with_backend(primary.clone())
            .with_backend(fallback.clone());
        StorageFacade::builder(registry)
            .with_settings(settings)
            .with_probe(primary.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_validation_never_reaches_backend() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        assert!(matches!(facade.get(Vec::<String>::new()).await, Err(StorageError::Validation(_))));
        assert!(matches!(facade.get("").await, Err(StorageError::Validation(_))));
        assert!(matches!(facade.remove(["a", ""]).await, Err(StorageError::Validation(_))));
        assert!(matches!(facade.set(Records::new()).await, Err(StorageError::Validation(_))));

        assert_eq!(primary.total_calls(), 0);
        assert_eq!(fallback.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_direct_round_trip() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("a", json!(1))).await.unwrap();
        assert_eq!(served.tier, BackendTier::DurableSynced);
        assert!(!served.fallback_used);

        let got = facade.get("a").await.unwrap();
        assert_eq!(got.value["a"], json!(1));

        facade.remove("a").await.unwrap();
        assert!(facade.get("a").await.unwrap().value.is_empty());
        assert_eq!(facade.flush().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_on_primary() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced).with_failures(2));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("a", json!(1))).await.unwrap();
        assert!(!served.fallback_used);
        assert_eq!(primary.calls(OpKind::Set), 3);
        assert_eq!(fallback.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fall_back() {
        let primary = Arc::new(MockStore::unavailable("sync", BackendTier::DurableSynced));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("a", json!(1))).await.unwrap();
        assert!(served.fallback_used);
        assert_eq!(served.tier, BackendTier::DurableLocal);
        assert!(served.durable);
        assert_eq!(primary.calls(OpKind::Set), 3);
        assert!(fallback.inner().contains_key("a"));
    }

    #[tokio::test]
    async fn test_quota_rejection_evicts_then_retries_once() {
        let seed: Records = (0..8)
            .map(|i| (format!("old-{i}"), json!("x".repeat(50))))
            .collect();
        let primary = Arc::new(
            MockStore::wrap(InMemoryStore::new("sync", BackendTier::DurableSynced).with_records(seed))
                .with_quota_rejections(1),
        );
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("new", json!(1))).await.unwrap();

        assert!(!served.fallback_used);
        // No blind retry: one rejected attempt, then one after eviction
        assert_eq!(primary.calls(OpKind::Set), 2);
        assert_eq!(primary.calls(OpKind::Remove), 5);
        assert!(primary.inner().contains_key("new"));
        assert_eq!(primary.inner().len(), 4);
        assert_eq!(fallback.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_quota_recovery_runs_one_eviction_pass() {
        let seed: Records = (0..20)
            .map(|i| (format!("old-{i:02}"), json!("x".repeat(50))))
            .collect();
        let primary = Arc::new(
            MockStore::wrap(InMemoryStore::new("sync", BackendTier::DurableSynced).with_records(seed))
                .with_quota_rejections(1)
                .with_usage_percent(99.0),
        );
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("new", json!(1))).await.unwrap();

        assert!(!served.fallback_used);
        // Still critical after the pass, but the refresh must not evict again
        assert_eq!(primary.calls(OpKind::Remove), 5);
        assert_eq!(primary.get_all_calls(), 1);
        assert_eq!(primary.calls(OpKind::Set), 2);
        assert_eq!(primary.inner().len(), 16);
    }

    #[tokio::test]
    async fn test_repeated_quota_rejection_falls_back() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced).with_quota_rejections(2));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let served = facade.set(one("a", json!(1))).await.unwrap();
        assert!(served.fallback_used);
        assert_eq!(primary.calls(OpKind::Set), 2);
    }

    #[tokio::test]
    async fn test_typed_records() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Prefs {
            theme: String,
            private_by_default: bool,
        }

        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let prefs = Prefs {
            theme: "dark".to_string(),
            private_by_default: true,
        };
        facade.set_record("settings", &prefs).await.unwrap();

        let loaded = facade.get_record::<Prefs>("settings").await.unwrap();
        assert_eq!(loaded.value, Some(prefs));

        let missing = facade.get_record::<Prefs>("nothing").await.unwrap();
        assert_eq!(missing.value, None);

        facade.set(one("broken", json!(42))).await.unwrap();
        let err = facade.get_record::<Prefs>("broken").await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_sets_share_one_call() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, StorageSettings::default());

        let (a, b, c) = tokio::join!(
            facade.set(one("a", json!(1))),
            facade.set(one("b", json!(2))),
            facade.set(one("c", json!(3))),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(primary.calls(OpKind::Set), 1);
        assert_eq!(primary.set_log()[0].len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_key_does_not_move_group_to_fallback() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced).with_poisoned_key("bad"));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, StorageSettings::default());

        let (good, bad, other) = tokio::join!(
            facade.set(one("good", json!(1))),
            facade.set(one("bad", json!(2))),
            facade.set(one("other", json!(3))),
        );

        let good = good.unwrap();
        let other = other.unwrap();
        let bad = bad.unwrap();
        assert_eq!(good.tier, BackendTier::DurableSynced);
        assert!(!good.fallback_used);
        assert_eq!(other.tier, BackendTier::DurableSynced);
        assert!(!other.fallback_used);
        assert_eq!(bad.tier, BackendTier::DurableLocal);
        assert!(bad.fallback_used);

        assert!(primary.inner().contains_key("good"));
        assert!(primary.inner().contains_key("other"));
        assert_eq!(fallback.inner().len(), 1);
        assert!(fallback.inner().contains_key("bad"));
    }

    #[test]
    fn test_operation_state_display() {
        assert_eq!(OperationState::Attempting(2).to_string(), "attempting(2)");
        assert_eq!(OperationState::Attempting(2).as_str(), "attempting");
        assert_eq!(OperationState::Retrying.to_string(), "retrying");
        assert_eq!(OperationState::FallbackAttempting.to_string(), "fallback_attempting");
    }

    #[tokio::test]
    async fn test_observers_receive_alerts() {
        let primary = Arc::new(MockStore::new("sync", BackendTier::DurableSynced).with_usage_percent(85.0));
        let fallback = Arc::new(MockStore::new("local", BackendTier::DurableLocal));
        let facade = facade_over(&primary, &fallback, direct());

        let observer = Arc::new(RecordingObserver::default());
        facade.add_observer(observer.clone());

        let usage = facade.get_usage(true).await;
        assert!((usage.usage_percent - 85.0).abs() < 1e-9);
        assert_eq!(observer.events(), vec![QuotaLevel::Warning]);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(InMemoryStore::new("sync", BackendTier::DurableSynced)));
        let settings = StorageSettings {
            batch_size: 0,
            ..StorageSettings::default()
        };
        let result = StorageFacade::builder(registry).with_settings(settings).build();
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_missing_primary_rejected() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(InMemoryStore::new("mem", BackendTier::InMemory)));
        assert!(StorageFacade::builder(registry).build().is_err());
    }
}
