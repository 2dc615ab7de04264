//! End-to-end test infrastructure for the pinmark storage layer.
//!
//! Provides a shared TestHarness that wires a `StorageFacade` over
//! fault-injecting backends for every tier, plus record helpers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use pinmark_storage::{
    BackendRegistry, InMemoryStore, MockStore, RecordingObserver, StorageFacade,
};
use pinmark_types::{BackendTier, QuotaThresholds, Records, StorageSettings};

/// Shared test harness for E2E tests.
///
/// Every tier is a `MockStore` so tests can inject failures and count
/// calls per backend.
pub struct TestHarness {
    /// Durable-synced primary
    pub primary: Arc<MockStore>,
    /// Durable-local fallback
    pub local: Arc<MockStore>,
    /// In-memory last resort
    pub memory: Arc<MockStore>,
    /// Receives every quota alert
    pub observer: Arc<RecordingObserver>,
    pub facade: StorageFacade,
}

impl TestHarness {
    /// Healthy backends, default settings (batching on).
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestHarness`].
pub struct HarnessBuilder {
    primary: MockStore,
    local: MockStore,
    memory: MockStore,
    settings: StorageSettings,
    thresholds: Option<QuotaThresholds>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            primary: MockStore::new("primary", BackendTier::DurableSynced),
            local: MockStore::new("local", BackendTier::DurableLocal),
            memory: MockStore::new("memory", BackendTier::InMemory),
            settings: StorageSettings::default(),
            thresholds: None,
        }
    }
}

impl HarnessBuilder {
    pub fn primary(mut self, primary: MockStore) -> Self {
        self.primary = primary;
        self
    }

    pub fn local(mut self, local: MockStore) -> Self {
        self.local = local;
        self
    }

    pub fn memory(mut self, memory: MockStore) -> Self {
        self.memory = memory;
        self
    }

    pub fn settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Dispatch every call directly instead of batching.
    pub fn direct(mut self) -> Self {
        self.settings.enable_batching = false;
        self
    }

    pub fn fallback_chain(mut self, chain: Vec<BackendTier>) -> Self {
        self.settings.fallback_chain = chain;
        self
    }

    pub fn thresholds(mut self, thresholds: QuotaThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn build(self) -> TestHarness {
        let primary = Arc::new(self.primary);
        let local = Arc::new(self.local);
        let memory = Arc::new(self.memory);
        let observer = Arc::new(RecordingObserver::default());

        let registry = BackendRegistry::new()
            .with_backend(primary.clone())
            .with_backend(local.clone())
            .with_backend(memory.clone());

        let mut builder = StorageFacade::builder(registry)
            .with_settings(self.settings)
            .with_probe(primary.clone())
            .with_observer(observer.clone());
        if let Some(thresholds) = self.thresholds {
            builder = builder.with_thresholds(thresholds);
        }
        let facade = builder.build().expect("Failed to build test facade");

        TestHarness {
            primary,
            local,
            memory,
            observer,
            facade,
        }
    }
}

/// Build a record map from key/value pairs.
pub fn entries(pairs: &[(&str, Value)]) -> Records {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// A string value whose record (key included) serializes to exactly
/// `record_bytes` bytes.
pub fn sized_value(key: &str, record_bytes: usize) -> Value {
    // Two bytes of JSON quotes around the payload
    let payload = record_bytes
        .saturating_sub(key.len())
        .saturating_sub(2);
    Value::String("x".repeat(payload))
}

/// `count` records named `{prefix}-{i}`, each exactly `record_bytes` bytes.
pub fn sized_records(prefix: &str, count: usize, record_bytes: usize) -> Records {
    (0..count)
        .map(|i| {
            let key = format!("{prefix}-{i:02}");
            let value = sized_value(&key, record_bytes);
            (key, value)
        })
        .collect()
}

/// A record carrying a `timestamp` field `age_ms` before `now_ms`.
pub fn timestamped(payload: &str, now_ms: i64, age_ms: i64) -> Value {
    json!({ "data": payload, "timestamp": now_ms - age_ms })
}

/// An in-memory store with a byte quota, pre-filled with `records`.
pub fn filled_store(name: &str, tier: BackendTier, quota_bytes: u64, records: Records) -> MockStore {
    MockStore::wrap(
        InMemoryStore::new(name, tier)
            .with_quota(quota_bytes)
            .with_records(records),
    )
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
