//! # pinmark-types
//!
//! Shared types for the pinmark storage layer.
//!
//! This crate defines the data structures used throughout the workspace:
//! - Records: opaque JSON values stored under caller-chosen keys
//! - Tiers: identifiers for the synced, local and in-memory backends
//! - Usage: quota snapshots, thresholds and their classification
//! - Settings: layered configuration and per-platform presets
//!
//! ## Usage
//!
//! ```rust
//! use pinmark_types::{QuotaLevel, QuotaThresholds};
//!
//! let thresholds = QuotaThresholds::default();
//! assert_eq!(thresholds.classify(96.0), QuotaLevel::Critical);
//! ```

pub mod config;
pub mod error;
pub mod record;
pub mod tier;
pub mod usage;

pub use config::{Platform, StorageSettings};
pub use error::TypesError;
pub use record::{
    approx_size_bytes, record_timestamp_ms, total_size_bytes, Keys, Record, Records,
    TIMESTAMP_FIELD,
};
pub use tier::BackendTier;
pub use usage::{QuotaLevel, QuotaThresholds, UsageSnapshot};
