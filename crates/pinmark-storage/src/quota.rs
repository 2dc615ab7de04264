//! Quota monitor.
//!
//! Probes the host's storage estimate, caches the snapshot for a TTL and
//! classifies usage against thresholds. Observers are told about warning,
//! approaching and critical usage; critical usage also runs one eviction
//! pass followed by a forced refresh.
//!
//! The monitor never fails: a probe that cannot be served yields a zeroed
//! snapshot so quota tracking never blocks a write.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use pinmark_types::{QuotaLevel, QuotaThresholds, UsageSnapshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{KeyValueStore, QuotaProbe};
use crate::eviction::EvictionPolicy;
use crate::retry::RetryExecutor;

/// Default snapshot lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Subscriber for quota alerts.
///
/// Callbacks run inline on the task that refreshed usage and should return
/// quickly.
pub trait QuotaObserver: Send + Sync {
    /// Usage is at or above the warning threshold.
    fn on_quota_warning(&self, _snapshot: &UsageSnapshot) {}

    /// Usage is at or above the cleanup threshold; critical is near.
    fn on_quota_approaching(&self, _snapshot: &UsageSnapshot) {}

    /// Usage is at or above the critical threshold; eviction is running.
    fn on_quota_critical(&self, _snapshot: &UsageSnapshot) {}
}

/// Cached, classifying view of one backend's quota.
pub struct QuotaMonitor {
    probe: Arc<dyn QuotaProbe>,
    thresholds: QuotaThresholds,
    cache_ttl: Duration,
    /// Last good snapshot and when it was taken
    cache: Mutex<Option<(Arc<UsageSnapshot>, Instant)>>,
    retry: RetryExecutor,
    observers: RwLock<Vec<Arc<dyn QuotaObserver>>>,
    eviction: Option<(EvictionPolicy, Arc<dyn KeyValueStore>)>,
}

impl QuotaMonitor {
    pub fn new(probe: Arc<dyn QuotaProbe>) -> Self {
        Self {
            probe,
            thresholds: QuotaThresholds::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(None),
            retry: RetryExecutor::default(),
            observers: RwLock::new(Vec::new()),
            eviction: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: QuotaThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Evict from `store` with `policy` whenever usage turns critical.
    pub fn with_eviction(mut self, policy: EvictionPolicy, store: Arc<dyn KeyValueStore>) -> Self {
        self.eviction = Some((policy, store));
        self
    }

    pub fn with_observer(self, observer: Arc<dyn QuotaObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&self, observer: Arc<dyn QuotaObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(_) => error!("Quota observer list lock poisoned, observer dropped"),
        }
    }

    pub fn thresholds(&self) -> &QuotaThresholds {
        &self.thresholds
    }

    /// Current usage.
    ///
    /// Returns the cached snapshot while it is younger than the TTL unless
    /// `force_refresh` is set. A fresh snapshot is classified and alerted on.
    pub async fn get_usage(&self, force_refresh: bool) -> Arc<UsageSnapshot> {
        if !force_refresh {
            if let Some(cached) = self.cached() {
                debug!(usage_percent = cached.usage_percent, "Using cached quota snapshot");
                return cached;
            }
        }

        let snapshot = self.probe_usage().await;
        let level = self.thresholds.classify(snapshot.usage_percent);
        self.alert(level, &snapshot);

        if level == QuotaLevel::Critical {
            if let Some(refreshed) = self.run_eviction().await {
                return refreshed;
            }
        }

        snapshot
    }

    /// Probe the host, cache and alert, but never evict.
    ///
    /// For callers that have just run their own eviction pass.
    pub async fn refresh_without_eviction(&self) -> Arc<UsageSnapshot> {
        let snapshot = self.probe_usage().await;
        let level = self.thresholds.classify(snapshot.usage_percent);
        self.alert(level, &snapshot);
        if level == QuotaLevel::Critical {
            debug!(usage_percent = snapshot.usage_percent, "Still critical, eviction already ran for this operation");
        }
        snapshot
    }

    /// Drop the cached snapshot so the next read probes the host.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn cached(&self) -> Option<Arc<UsageSnapshot>> {
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|(_, taken_at)| taken_at.elapsed() < self.cache_ttl)
            .map(|(snapshot, _)| Arc::clone(snapshot))
    }

    /// Probe the host and replace the cache. Failures yield a zeroed,
    /// uncached snapshot.
    async fn probe_usage(&self) -> Arc<UsageSnapshot> {
        let probe = self.probe.as_ref();
        let now_ms = || chrono::Utc::now().timestamp_millis();

        match self.retry.run("quota-probe", move || probe.estimate()).await {
            Ok(estimate) => {
                let snapshot = Arc::new(UsageSnapshot::from_estimate(
                    estimate.usage,
                    estimate.quota,
                    now_ms(),
                ));
                if let Ok(mut cache) = self.cache.lock() {
                    *cache = Some((Arc::clone(&snapshot), Instant::now()));
                }
                debug!(
                    used_bytes = snapshot.used_bytes,
                    quota_bytes = snapshot.quota_bytes,
                    usage_percent = snapshot.usage_percent,
                    "Quota snapshot refreshed"
                );
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Quota probe failed, reporting zero usage");
                Arc::new(UsageSnapshot::zeroed(now_ms()))
            }
        }
    }

    fn alert(&self, level: QuotaLevel, snapshot: &UsageSnapshot) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => Vec::new(),
        };

        match level {
            QuotaLevel::Normal => {}
            QuotaLevel::Warning => {
                warn!(usage_percent = snapshot.usage_percent, "Storage usage above warning threshold");
                observers.iter().for_each(|o| o.on_quota_warning(snapshot));
            }
            QuotaLevel::Approaching => {
                warn!(
                    usage_percent = snapshot.usage_percent,
                    critical = self.thresholds.critical,
                    "Storage usage approaching critical threshold"
                );
                observers.iter().for_each(|o| {
                    o.on_quota_warning(snapshot);
                    o.on_quota_approaching(snapshot);
                });
            }
            QuotaLevel::Critical => {
                error!(usage_percent = snapshot.usage_percent, "Storage usage critical");
                observers.iter().for_each(|o| o.on_quota_critical(snapshot));
            }
        }
    }

    /// One eviction pass plus a forced re-probe. The re-probe does not
    /// evict again even if usage is still critical.
    async fn run_eviction(&self) -> Option<Arc<UsageSnapshot>> {
        let (policy, store) = self.eviction.as_ref()?;

        match policy.evict(store.as_ref()).await {
            Ok(report) if report.removed_count() > 0 => {
                let refreshed = self.probe_usage().await;
                info!(
                    removed = report.removed_count(),
                    usage_percent = refreshed.usage_percent,
                    level = self.thresholds.classify(refreshed.usage_percent).as_str(),
                    "Usage after eviction"
                );
                Some(refreshed)
            }
            Ok(_) => {
                warn!(backend = store.name(), "Eviction found nothing to remove");
                None
            }
            Err(e) => {
                warn!(backend = store.name(), error = %e, "Eviction pass failed");
                None
            }
        }
    }
}
