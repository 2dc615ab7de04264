//! Backend adapter contract.
//!
//! A `KeyValueStore` is a pure pass-through to exactly one backend instance:
//! no retries, no batching, no fallback. Those concerns live in the layers
//! above. One adapter exists per tier (durable-synced, durable-local,
//! in-memory).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pinmark_types::{BackendTier, Records};

use crate::error::StorageError;

/// Uniform async access to one key-value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Instance name used in logs and error messages.
    fn name(&self) -> &str;

    /// Tier this instance belongs to.
    fn tier(&self) -> BackendTier;

    /// Fetch the given keys. Missing keys are absent from the result.
    async fn get(&self, keys: &[String]) -> Result<Records, StorageError>;

    /// Fetch every record in the store.
    async fn get_all(&self) -> Result<Records, StorageError>;

    /// Write all entries.
    async fn set(&self, entries: Records) -> Result<(), StorageError>;

    /// Delete the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// Raw `{usage, quota}` estimate in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// Host storage-estimate primitive.
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn estimate(&self) -> Result<StorageEstimate, StorageError>;
}

/// Kind of a storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Get,
    Set,
    Remove,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Get => "get",
            OpKind::Set => "set",
            OpKind::Remove => "remove",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage operation with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    Get(Vec<String>),
    Set(Records),
    Remove(Vec<String>),
}

impl StorageOp {
    pub fn kind(&self) -> OpKind {
        match self {
            StorageOp::Get(_) => OpKind::Get,
            StorageOp::Set(_) => OpKind::Set,
            StorageOp::Remove(_) => OpKind::Remove,
        }
    }

    /// Keys this operation touches.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            StorageOp::Get(keys) | StorageOp::Remove(keys) => {
                keys.iter().map(String::as_str).collect()
            }
            StorageOp::Set(entries) => entries.keys().map(String::as_str).collect(),
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, StorageOp::Get(_))
    }

    /// Run this operation against one store.
    ///
    /// Reads return the fetched records; writes return an empty map.
    pub async fn apply(&self, store: &dyn KeyValueStore) -> Result<Records, StorageError> {
        match self {
            StorageOp::Get(keys) => store.get(keys).await,
            StorageOp::Set(entries) => store.set(entries.clone()).await.map(|_| Records::new()),
            StorageOp::Remove(keys) => store.remove(keys).await.map(|_| Records::new()),
        }
    }
}

/// The set of wired backends, one per tier.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendTier, Arc<dyn KeyValueStore>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own tier. A later registration for the
    /// same tier replaces the earlier one.
    pub fn with_backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.register(backend);
        self
    }

    pub fn register(&mut self, backend: Arc<dyn KeyValueStore>) {
        self.backends.insert(backend.tier(), backend);
    }

    pub fn get(&self, tier: BackendTier) -> Option<Arc<dyn KeyValueStore>> {
        self.backends.get(&tier).cloned()
    }

    /// Resolve the primary and its fallback chain.
    ///
    /// Tiers in `chain` that have no registered backend are skipped.
    pub fn resolve(
        &self,
        primary: BackendTier,
        chain: &[BackendTier],
    ) -> Result<(Arc<dyn KeyValueStore>, Vec<Arc<dyn KeyValueStore>>), StorageError> {
        let primary_backend = self.get(primary).ok_or_else(|| {
            StorageError::Validation(format!("no backend registered for primary tier {primary}"))
        })?;

        let fallbacks = chain
            .iter()
            .filter(|tier| **tier != primary)
            .filter_map(|tier| {
                let backend = self.get(*tier);
                if backend.is_none() {
                    tracing::warn!(tier = %tier, "No backend registered for fallback tier, skipping");
                }
                backend
            })
            .collect();

        Ok((primary_backend, fallbacks))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_dispatches_by_kind() {
        let store = InMemoryStore::new("mem", BackendTier::InMemory);

        let mut entries = Records::new();
        entries.insert("a".to_string(), json!(1));
        let written = StorageOp::Set(entries).apply(&store).await.unwrap();
        assert!(written.is_empty());

        let read = StorageOp::Get(vec!["a".to_string()]).apply(&store).await.unwrap();
        assert_eq!(read.get("a"), Some(&json!(1)));

        StorageOp::Remove(vec!["a".to_string()]).apply(&store).await.unwrap();
        let read = StorageOp::Get(vec!["a".to_string()]).apply(&store).await.unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn test_op_metadata() {
        let op = StorageOp::Remove(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(op.kind(), OpKind::Remove);
        assert_eq!(op.keys(), vec!["x", "y"]);
        assert!(op.is_write());
        assert!(!StorageOp::Get(vec![]).is_write());
    }

    #[test]
    fn test_registry_resolves_chain_in_order() {
        let registry = BackendRegistry::new()
            .with_backend(Arc::new(InMemoryStore::new("sync", BackendTier::DurableSynced)))
            .with_backend(Arc::new(InMemoryStore::new("mem", BackendTier::InMemory)));

        let (primary, fallbacks) = registry
            .resolve(
                BackendTier::DurableSynced,
                &[BackendTier::DurableLocal, BackendTier::InMemory],
            )
            .unwrap();

        assert_eq!(primary.name(), "sync");
        // durable-local is not registered and is skipped
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].tier(), BackendTier::InMemory);
    }

    #[test]
    fn test_registry_missing_primary() {
        let registry = BackendRegistry::new();
        assert!(registry
            .resolve(BackendTier::DurableSynced, &[])
            .is_err());
    }
}
