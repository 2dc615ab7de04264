//! # pinmark-storage
//!
//! Storage resilience layer for the pinmark extension.
//!
//! Reads and writes small JSON records in a quota-constrained key-value store
//! that is only eventually available, surviving transient failures, quota
//! exhaustion and backend outages.
//!
//! ## Core Concepts
//!
//! - **Backend Adapter**: `KeyValueStore`, a pass-through to exactly one backend tier
//! - **Retry Executor**: bounded exponential backoff around one operation
//! - **Quota Monitor**: cached usage snapshots, threshold alerts, eviction trigger
//! - **Eviction Policy**: removes the largest, oldest records, a capped number per pass
//! - **Batch Queue**: coalesces calls issued within a debounce window
//! - **Fallback Coordinator**: walks the tier chain when the primary fails
//! - **Storage Facade**: the public `get`/`set`/`remove`/`get_usage` surface
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pinmark_storage::{BackendRegistry, InMemoryStore, StorageFacade};
//! use pinmark_types::BackendTier;
//!
//! let synced = Arc::new(InMemoryStore::new("synced", BackendTier::DurableSynced).with_quota(102_400));
//! let registry = BackendRegistry::new()
//!     .with_backend(synced.clone())
//!     .with_backend(Arc::new(InMemoryStore::new("memory", BackendTier::InMemory)));
//!
//! let storage = StorageFacade::builder(registry).with_probe(synced).build()?;
//! storage.set_record("recent_tags", &vec!["rust", "async"]).await?;
//! let served = storage.get("recent_tags").await?;
//! if !served.durable {
//!     // warn the user the write only lives in memory
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod error;
pub mod eviction;
pub mod facade;
pub mod fallback;
pub mod memory;
pub mod mock;
pub mod quota;
pub mod retry;

// Re-export main types at crate root
pub use backend::{BackendRegistry, KeyValueStore, OpKind, QuotaProbe, StorageEstimate, StorageOp};
pub use batch::{BatchConfig, BatchDispatcher, BatchQueue, BatchResult};
pub use error::StorageError;
pub use eviction::{CandidateFilter, EvictionCandidate, EvictionPolicy, EvictionReport};
pub use facade::{OperationState, StorageFacade, StorageFacadeBuilder};
pub use fallback::{FallbackCoordinator, Served};
pub use memory::InMemoryStore;
pub use mock::{MockStore, RecordingObserver};
pub use quota::{QuotaMonitor, QuotaObserver};
pub use retry::{RetryExecutor, RetryFailure, RetryPolicy};
