//! Quota usage types.
//!
//! A `UsageSnapshot` is produced on every successful probe of the host's
//! storage-estimate primitive. Snapshots are immutable: a newer probe
//! supersedes an older snapshot, it never edits it.

use serde::{Deserialize, Serialize};

use crate::tier::BackendTier;

/// Point-in-time view of how much of a backend's quota is in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Bytes currently in use
    pub used_bytes: u64,

    /// Total bytes the host grants (0 when unknown)
    pub quota_bytes: u64,

    /// `used / quota * 100`, or 0 when the quota is unknown
    pub usage_percent: f64,

    /// `quota - used`, saturating at zero
    pub available_bytes: u64,

    /// Unix milliseconds at which the probe completed
    pub captured_at_ms: i64,
}

impl UsageSnapshot {
    /// Build a snapshot from a raw `{usage, quota}` estimate.
    pub fn from_estimate(used_bytes: u64, quota_bytes: u64, captured_at_ms: i64) -> Self {
        let usage_percent = if quota_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / quota_bytes as f64 * 100.0
        };

        Self {
            used_bytes,
            quota_bytes,
            usage_percent,
            available_bytes: quota_bytes.saturating_sub(used_bytes),
            captured_at_ms,
        }
    }

    /// Snapshot returned when the probe is unavailable or fails.
    pub fn zeroed(captured_at_ms: i64) -> Self {
        Self::from_estimate(0, 0, captured_at_ms)
    }

    /// Whether this snapshot carries real quota information.
    pub fn is_known(&self) -> bool {
        self.quota_bytes > 0
    }
}

/// Classification of a usage percentage against configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    /// Below the warning threshold
    Normal,

    /// At or above the warning threshold
    Warning,

    /// Warning, and at or above the cleanup threshold
    Approaching,

    /// At or above the critical threshold; eviction runs
    Critical,
}

impl QuotaLevel {
    /// Returns the display name for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaLevel::Normal => "normal",
            QuotaLevel::Warning => "warning",
            QuotaLevel::Approaching => "approaching",
            QuotaLevel::Critical => "critical",
        }
    }
}

/// Percentage thresholds used to classify usage.
///
/// Invariant: `warning < cleanup < critical <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaThresholds {
    /// Warn at or above this percentage
    #[serde(default = "default_warning")]
    pub warning: f64,

    /// Emit the predictive "approaching critical" notice at or above this percentage
    #[serde(default = "default_cleanup")]
    pub cleanup: f64,

    /// Alert and evict at or above this percentage
    #[serde(default = "default_critical")]
    pub critical: f64,
}

fn default_warning() -> f64 {
    80.0
}

fn default_cleanup() -> f64 {
    90.0
}

fn default_critical() -> f64 {
    95.0
}

impl Default for QuotaThresholds {
    fn default() -> Self {
        Self {
            warning: default_warning(),
            cleanup: default_cleanup(),
            critical: default_critical(),
        }
    }
}

impl QuotaThresholds {
    /// Create thresholds from explicit percentages.
    pub fn new(warning: f64, cleanup: f64, critical: f64) -> Self {
        Self {
            warning,
            cleanup,
            critical,
        }
    }

    /// Thresholds suited to a backend tier.
    ///
    /// The synced store has a much smaller absolute quota, so it warns earlier.
    pub fn for_tier(tier: BackendTier) -> Self {
        match tier {
            BackendTier::DurableSynced => Self::default(),
            BackendTier::DurableLocal | BackendTier::InMemory => Self::new(90.0, 95.0, 98.0),
        }
    }

    /// Classify a usage percentage.
    pub fn classify(&self, usage_percent: f64) -> QuotaLevel {
        if usage_percent >= self.critical {
            QuotaLevel::Critical
        } else if usage_percent >= self.cleanup && usage_percent >= self.warning {
            QuotaLevel::Approaching
        } else if usage_percent >= self.warning {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Normal
        }
    }

    /// Validate threshold ordering.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.warning < self.cleanup && self.cleanup < self.critical) {
            return Err(format!(
                "thresholds must satisfy warning < cleanup < critical, got {}/{}/{}",
                self.warning, self.cleanup, self.critical
            ));
        }
        if self.warning <= 0.0 || self.critical > 100.0 {
            return Err(format!(
                "thresholds must lie in (0, 100], got {}/{}/{}",
                self.warning, self.cleanup, self.critical
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_estimate() {
        let snapshot = UsageSnapshot::from_estimate(250, 1000, 42);
        assert_eq!(snapshot.used_bytes, 250);
        assert_eq!(snapshot.available_bytes, 750);
        assert!((snapshot.usage_percent - 25.0).abs() < f64::EPSILON);
        assert!(snapshot.is_known());
    }

    #[test]
    fn test_snapshot_unknown_quota() {
        let snapshot = UsageSnapshot::from_estimate(500, 0, 0);
        assert_eq!(snapshot.usage_percent, 0.0);
        assert_eq!(snapshot.available_bytes, 0);
        assert!(!snapshot.is_known());
        assert_eq!(UsageSnapshot::zeroed(7).used_bytes, 0);
    }

    #[test]
    fn test_snapshot_over_quota_saturates() {
        let snapshot = UsageSnapshot::from_estimate(1200, 1000, 0);
        assert_eq!(snapshot.available_bytes, 0);
        assert!(snapshot.usage_percent > 100.0);
    }

    #[test]
    fn test_classification() {
        let thresholds = QuotaThresholds::default();
        assert_eq!(thresholds.classify(50.0), QuotaLevel::Normal);
        assert_eq!(thresholds.classify(80.0), QuotaLevel::Warning);
        assert_eq!(thresholds.classify(81.0), QuotaLevel::Warning);
        assert_eq!(thresholds.classify(91.0), QuotaLevel::Approaching);
        assert_eq!(thresholds.classify(95.0), QuotaLevel::Critical);
        assert_eq!(thresholds.classify(96.0), QuotaLevel::Critical);
    }

    #[test]
    fn test_synced_tier_warns_earlier() {
        let synced = QuotaThresholds::for_tier(BackendTier::DurableSynced);
        let local = QuotaThresholds::for_tier(BackendTier::DurableLocal);
        assert!(synced.warning < local.warning);
        assert_eq!(local.classify(85.0), QuotaLevel::Normal);
        assert_eq!(synced.classify(85.0), QuotaLevel::Warning);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(QuotaThresholds::default().validate().is_ok());
        assert!(QuotaThresholds::new(90.0, 80.0, 95.0).validate().is_err());
        assert!(QuotaThresholds::new(80.0, 90.0, 101.0).validate().is_err());
        assert!(QuotaThresholds::new(0.0, 90.0, 95.0).validate().is_err());
    }
}
