//! Eviction policy.
//!
//! Selects keys to remove when usage is critical. Every record is measured
//! (serialized size, age from its `timestamp` field) and ranked largest
//! first, oldest first among equal sizes. Removals run one key at a time and
//! stop at a fixed cap per pass.

use std::time::Duration;

use pinmark_types::{approx_size_bytes, record_timestamp_ms, Records, StorageSettings};
use tracing::{debug, info, warn};

use crate::backend::KeyValueStore;
use crate::error::StorageError;

/// Default cap on removals per pass.
pub const DEFAULT_MAX_REMOVALS: usize = 5;

/// One record considered for removal. Derived per pass, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: String,
    pub approx_size_bytes: u64,
    /// Zero when the record has no timestamp
    pub age_ms: u64,
}

/// Which records may be evicted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateFilter {
    /// Every record is a candidate
    #[default]
    All,

    /// Only records above a size floor or older than a staleness window
    LargeOrStale {
        min_size_bytes: u64,
        stale_after: Duration,
    },
}

impl CandidateFilter {
    /// 1 KiB size floor, 7 day staleness window.
    pub fn large_or_stale() -> Self {
        CandidateFilter::LargeOrStale {
            min_size_bytes: 1024,
            stale_after: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    pub fn admits(&self, candidate: &EvictionCandidate) -> bool {
        match self {
            CandidateFilter::All => true,
            CandidateFilter::LargeOrStale {
                min_size_bytes,
                stale_after,
            } => {
                candidate.approx_size_bytes > *min_size_bytes
                    || u128::from(candidate.age_ms) > stale_after.as_millis()
            }
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Keys removed, in removal order
    pub removed: Vec<String>,

    /// Keys whose removal failed and was skipped
    pub failed: Vec<String>,

    /// Candidates admitted by the filter
    pub candidates: usize,
}

impl EvictionReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Ranks records and removes the top candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    max_removals: usize,
    filter: CandidateFilter,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REMOVALS)
    }
}

impl EvictionPolicy {
    pub fn new(max_removals: usize) -> Self {
        Self {
            max_removals,
            filter: CandidateFilter::All,
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.eviction_max_removals)
    }

    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn max_removals(&self) -> usize {
        self.max_removals
    }

    /// Admitted candidates, ranked by size desc then age desc.
    ///
    /// Ties fall back to key order so a pass is deterministic.
    pub fn candidates(&self, records: &Records, now_ms: i64) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = records
            .iter()
            .map(|(key, record)| EvictionCandidate {
                key: key.clone(),
                approx_size_bytes: approx_size_bytes(key, record),
                age_ms: record_timestamp_ms(record)
                    .map(|ts| now_ms.saturating_sub(ts).max(0) as u64)
                    .unwrap_or(0),
            })
            .filter(|candidate| self.filter.admits(candidate))
            .collect();

        candidates.sort_by(|a, b| {
            b.approx_size_bytes
                .cmp(&a.approx_size_bytes)
                .then(b.age_ms.cmp(&a.age_ms))
                .then(a.key.cmp(&b.key))
        });
        candidates
    }

    /// Run one pass against `store` using the current wall clock.
    pub async fn evict(&self, store: &dyn KeyValueStore) -> Result<EvictionReport, StorageError> {
        self.evict_at(store, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Run one pass with ages measured against `now_ms`.
    ///
    /// Fails only if the record set cannot be enumerated. A key whose
    /// removal fails is logged and skipped; the pass continues with the next
    /// candidate until `max_removals` keys are gone or candidates run out.
    pub async fn evict_at(
        &self,
        store: &dyn KeyValueStore,
        now_ms: i64,
    ) -> Result<EvictionReport, StorageError> {
        let records = store.get_all().await?;
        let candidates = self.candidates(&records, now_ms);

        let mut report = EvictionReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        debug!(
            backend = store.name(),
            records = records.len(),
            candidates = candidates.len(),
            max_removals = self.max_removals,
            "Starting eviction pass"
        );

        for candidate in candidates {
            if report.removed.len() >= self.max_removals {
                break;
            }

            match store.remove(std::slice::from_ref(&candidate.key)).await {
                Ok(()) => {
                    debug!(
                        backend = store.name(),
                        key = %candidate.key,
                        size_bytes = candidate.approx_size_bytes,
                        age_ms = candidate.age_ms,
                        "Evicted record"
                    );
                    report.removed.push(candidate.key);
                }
                Err(e) => {
                    warn!(
                        backend = store.name(),
                        key = %candidate.key,
                        error = %e,
                        "Failed to evict record, skipping"
                    );
                    report.failed.push(candidate.key);
                }
            }
        }

        info!(
            backend = store.name(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Eviction pass complete"
        );
        Ok(report)
    }
}
