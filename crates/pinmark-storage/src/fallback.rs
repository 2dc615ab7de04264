//! Fallback coordinator.
//!
//! Runs an operation against the primary backend and, when that fails, walks
//! the fallback chain in order until one tier succeeds. The result is tagged
//! with the tier that served it so callers can tell when data only landed in
//! a non-durable tier.

use std::future::Future;
use std::sync::Arc;

use pinmark_types::BackendTier;
use tracing::{debug, error, warn};

use crate::backend::{BackendRegistry, KeyValueStore};
use crate::error::StorageError;

/// A value together with the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,

    /// Tier of the serving backend
    pub tier: BackendTier,

    /// Name of the serving backend
    pub backend: String,

    /// False when the serving tier loses data at process exit
    pub durable: bool,

    /// True when the primary failed and a fallback tier answered
    pub fallback_used: bool,
}

impl<T> Served<T> {
    pub(crate) fn new(value: T, backend: &dyn KeyValueStore, fallback_used: bool) -> Self {
        let tier = backend.tier();
        Self {
            value,
            tier,
            backend: backend.name().to_string(),
            durable: tier.is_durable(),
            fallback_used,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            value: f(self.value),
            tier: self.tier,
            backend: self.backend,
            durable: self.durable,
            fallback_used: self.fallback_used,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Primary backend plus its ordered fallback chain.
#[derive(Clone)]
pub struct FallbackCoordinator {
    primary: Arc<dyn KeyValueStore>,
    chain: Vec<Arc<dyn KeyValueStore>>,
}

impl FallbackCoordinator {
    pub fn new(primary: Arc<dyn KeyValueStore>, chain: Vec<Arc<dyn KeyValueStore>>) -> Self {
        Self { primary, chain }
    }

    /// Resolve the primary and chain tiers from a registry.
    pub fn from_registry(
        registry: &BackendRegistry,
        primary: BackendTier,
        chain: &[BackendTier],
    ) -> Result<Self, StorageError> {
        let (primary, chain) = registry.resolve(primary, chain)?;
        Ok(Self::new(primary, chain))
    }

    pub fn primary(&self) -> &Arc<dyn KeyValueStore> {
        &self.primary
    }

    pub fn chain(&self) -> &[Arc<dyn KeyValueStore>] {
        &self.chain
    }

    /// Run `op` against this coordinator's primary and chain.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<Served<T>, StorageError>
    where
        F: Fn(Arc<dyn KeyValueStore>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        Self::with_fallback(op, &self.primary, &self.chain).await
    }

    /// Run `op` against `primary`, then each of `chain` in order on failure.
    ///
    /// Errors that no other tier could fix (validation, decoding) are
    /// returned as-is without touching the chain. When every tier fails the
    /// primary's error is surfaced wrapped in `AllBackendsExhausted`; the
    /// fallback errors are only logged.
    pub async fn with_fallback<T, F, Fut>(
        op: F,
        primary: &Arc<dyn KeyValueStore>,
        chain: &[Arc<dyn KeyValueStore>],
    ) -> Result<Served<T>, StorageError>
    where
        F: Fn(Arc<dyn KeyValueStore>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let primary_error = match op(Arc::clone(primary)).await {
            Ok(value) => return Ok(Served::new(value, primary.as_ref(), false)),
            Err(e) => e,
        };

        if !primary_error.allows_fallback() {
            debug!(backend = primary.name(), error = %primary_error, "Failure not eligible for fallback");
            return Err(primary_error);
        }

        warn!(
            backend = primary.name(),
            tier = %primary.tier(),
            error = %primary_error,
            fallbacks = chain.len(),
            "Primary backend failed, trying fallback chain"
        );

        for backend in chain {
            match op(Arc::clone(backend)).await {
                Ok(value) => {
                    if !backend.tier().is_durable() {
                        warn!(
                            backend = backend.name(),
                            tier = %backend.tier(),
                            "Served by non-durable tier, data will not survive restart"
                        );
                    } else {
                        warn!(backend = backend.name(), tier = %backend.tier(), "Served by fallback tier");
                    }
                    return Ok(Served::new(value, backend.as_ref(), true));
                }
                Err(e) => {
                    warn!(
                        backend = backend.name(),
                        tier = %backend.tier(),
                        error = %e,
                        "Fallback tier failed"
                    );
                }
            }
        }

        error!(
            backend = primary.name(),
            error = %primary_error,
            "All backends exhausted"
        );
        Err(StorageError::AllBackendsExhausted {
            source: Box::new(primary_error),
        })
    }
}
