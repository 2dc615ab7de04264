//! Fault-injecting backend for tests.
//!
//! `MockStore` wraps an `InMemoryStore` and can be told to fail in the ways
//! real host stores do: permanently, for the next N calls, with a quota
//! rejection, or whenever a particular key is involved. It also counts calls
//! per operation and records every `set` payload.
//!
//! `RecordingObserver` captures quota alerts in the order they fire.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use pinmark_types::{BackendTier, QuotaLevel, Records, UsageSnapshot};

use crate::backend::{KeyValueStore, OpKind, QuotaProbe, StorageEstimate};
use crate::error::StorageError;
use crate::memory::InMemoryStore;
use crate::quota::QuotaObserver;

/// Quota assumed when a forced percentage is reported for an unbounded store.
const FORCED_PROBE_QUOTA: u64 = 100_000;

/// Mock backend with failure injection and call accounting.
pub struct MockStore {
    inner: InMemoryStore,
    fail_always: AtomicBool,
    fail_next: AtomicU32,
    quota_exceeded_next: AtomicU32,
    poisoned_keys: Mutex<HashSet<String>>,
    probe_fails: AtomicBool,
    forced_percent: Mutex<Option<f64>>,
    get_calls: AtomicU32,
    get_all_calls: AtomicU32,
    set_calls: AtomicU32,
    remove_calls: AtomicU32,
    probe_calls: AtomicU32,
    set_log: Mutex<Vec<Records>>,
}

impl MockStore {
    /// Healthy, empty, unbounded mock.
    pub fn new(name: impl Into<String>, tier: BackendTier) -> Self {
        Self::wrap(InMemoryStore::new(name, tier))
    }

    /// Wrap an existing in-memory store (e.g. one with a quota or seed data).
    pub fn wrap(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_always: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            quota_exceeded_next: AtomicU32::new(0),
            poisoned_keys: Mutex::new(HashSet::new()),
            probe_fails: AtomicBool::new(false),
            forced_percent: Mutex::new(None),
            get_calls: AtomicU32::new(0),
            get_all_calls: AtomicU32::new(0),
            set_calls: AtomicU32::new(0),
            remove_calls: AtomicU32::new(0),
            probe_calls: AtomicU32::new(0),
            set_log: Mutex::new(Vec::new()),
        }
    }

    /// Mock whose every call fails with `BackendUnavailable`.
    pub fn unavailable(name: impl Into<String>, tier: BackendTier) -> Self {
        let store = Self::new(name, tier);
        store.set_fail_always(true);
        store
    }

    /// Fail the next `n` calls with `BackendUnavailable`.
    pub fn with_failures(self, n: u32) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Reject the next `n` writes with `QuotaExceeded`.
    pub fn with_quota_rejections(self, n: u32) -> Self {
        self.quota_exceeded_next.store(n, Ordering::SeqCst);
        self
    }

    /// Fail any call that touches `key`.
    pub fn with_poisoned_key(self, key: impl Into<String>) -> Self {
        if let Ok(mut keys) = self.poisoned_keys.lock() {
            keys.insert(key.into());
        }
        self
    }

    /// Report a fixed usage percentage from the probe.
    pub fn with_usage_percent(self, percent: f64) -> Self {
        self.set_usage_percent(Some(percent));
        self
    }

    /// Make the probe fail.
    pub fn with_failing_probe(self) -> Self {
        self.probe_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    pub fn set_usage_percent(&self, percent: Option<f64>) {
        if let Ok(mut forced) = self.forced_percent.lock() {
            *forced = percent;
        }
    }

    /// Wrapped store, for inspecting contents.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Calls made for one operation kind (`get_all` is counted separately).
    pub fn calls(&self, kind: OpKind) -> u32 {
        match kind {
            OpKind::Get => self.get_calls.load(Ordering::SeqCst),
            OpKind::Set => self.set_calls.load(Ordering::SeqCst),
            OpKind::Remove => self.remove_calls.load(Ordering::SeqCst),
        }
    }

    pub fn get_all_calls(&self) -> u32 {
        self.get_all_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls(OpKind::Get)
            + self.calls(OpKind::Set)
            + self.calls(OpKind::Remove)
            + self.get_all_calls()
    }

    /// Payload of every `set` call, successful or not, in call order.
    pub fn set_log(&self) -> Vec<Records> {
        self.set_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn check<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Result<(), StorageError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(self.inner.name(), "backend offline"));
        }

        if let Ok(poisoned) = self.poisoned_keys.lock() {
            if let Some(key) = keys.into_iter().find(|key| poisoned.contains(*key)) {
                return Err(StorageError::unavailable(
                    self.inner.name(),
                    format!("host rejected key {key}"),
                ));
            }
        }

        if take_one(&self.fail_next) {
            return Err(StorageError::unavailable(self.inner.name(), "transient failure"));
        }

        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl KeyValueStore for MockStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tier(&self) -> BackendTier {
        self.inner.tier()
    }

    async fn get(&self, keys: &[String]) -> Result<Records, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check(keys)?;
        self.inner.get(keys).await
    }

    async fn get_all(&self) -> Result<Records, StorageError> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        self.check(std::iter::empty())?;
        self.inner.get_all().await
    }

    async fn set(&self, entries: Records) -> Result<(), StorageError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.set_log.lock() {
            log.push(entries.clone());
        }
        self.check(entries.keys())?;

        if take_one(&self.quota_exceeded_next) {
            return Err(StorageError::quota_exceeded(
                self.inner.name(),
                "QUOTA_BYTES quota exceeded",
            ));
        }

        self.inner.set(entries).await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check(keys)?;
        self.inner.remove(keys).await
    }
}

#[async_trait]
impl QuotaProbe for MockStore {
    async fn estimate(&self) -> Result<StorageEstimate, StorageError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);

        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                self.inner.name(),
                "storage estimate unavailable",
            ));
        }

        let forced = self.forced_percent.lock().ok().and_then(|forced| *forced);
        if let Some(percent) = forced {
            let quota = self.inner.quota_bytes().unwrap_or(FORCED_PROBE_QUOTA);
            let usage = (quota as f64 * percent / 100.0).round() as u64;
            return Ok(StorageEstimate { usage, quota });
        }

        self.inner.estimate().await
    }
}

/// Quota observer that records every alert it receives.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<QuotaLevel>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<QuotaLevel> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn record(&self, level: QuotaLevel) {
        if let Ok(mut events) = self.events.lock() {
            events.push(level);
        }
    }
}

impl QuotaObserver for RecordingObserver {
    fn on_quota_warning(&self, _snapshot: &UsageSnapshot) {
        self.record(QuotaLevel::Warning);
    }

    fn on_quota_approaching(&self, _snapshot: &UsageSnapshot) {
        self.record(QuotaLevel::Approaching);
    }

    fn on_quota_critical(&self, _snapshot: &UsageSnapshot) {
        self.record(QuotaLevel::Critical);
    }
}
