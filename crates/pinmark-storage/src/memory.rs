//! In-memory backend.
//!
//! Serves as the last-resort fallback tier (data lives for the process
//! lifetime only) and, with a byte quota, as a stand-in for a
//! capacity-constrained host store.

use std::sync::RwLock;

use async_trait::async_trait;
use pinmark_types::{total_size_bytes, BackendTier, Records};

use crate::backend::{KeyValueStore, QuotaProbe, StorageEstimate};
use crate::error::StorageError;

/// Key-value store held in process memory.
pub struct InMemoryStore {
    name: String,
    tier: BackendTier,
    records: RwLock<Records>,
    /// Byte quota; `None` means unbounded
    quota_bytes: Option<u64>,
}

impl InMemoryStore {
    /// Create an empty, unbounded store.
    pub fn new(name: impl Into<String>, tier: BackendTier) -> Self {
        Self {
            name: name.into(),
            tier,
            records: RwLock::new(Records::new()),
            quota_bytes: None,
        }
    }

    /// Enforce a byte quota on writes.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Seed the store with records, bypassing the quota.
    pub fn with_records(self, records: Records) -> Self {
        if let Ok(mut guard) = self.records.write() {
            guard.extend(records);
        }
        self
    }

    /// Bytes currently in use.
    pub fn used_bytes(&self) -> u64 {
        self.records
            .read()
            .map(|records| total_size_bytes(&records))
            .unwrap_or(0)
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(key))
            .unwrap_or(false)
    }

    /// Copy of every record, without going through the async contract.
    pub fn snapshot(&self) -> Records {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn poisoned(&self) -> StorageError {
        StorageError::unavailable(&self.name, "in-memory store lock poisoned")
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> BackendTier {
        self.tier
    }

    async fn get(&self, keys: &[String]) -> Result<Records, StorageError> {
        let records = self.records.read().map_err(|_| self.poisoned())?;
        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<Records, StorageError> {
        let records = self.records.read().map_err(|_| self.poisoned())?;
        Ok(records.clone())
    }

    async fn set(&self, entries: Records) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| self.poisoned())?;

        if let Some(quota) = self.quota_bytes {
            let mut projected = records.clone();
            projected.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            let needed = total_size_bytes(&projected);
            if needed > quota {
                return Err(StorageError::quota_exceeded(
                    &self.name,
                    format!("write needs {needed} bytes, quota is {quota} bytes"),
                ));
            }
        }

        records.extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaProbe for InMemoryStore {
    async fn estimate(&self) -> Result<StorageEstimate, StorageError> {
        Ok(StorageEstimate {
            usage: self.used_bytes(),
            quota: self.quota_bytes.unwrap_or(0),
        })
    }
}
