//! JSON file backend.
//!
//! Persists every record in a single JSON document. Writes go to a sibling
//! temp file that is renamed over the store, so a crash mid-write leaves the
//! previous document intact. Usage is the document's size against a fixed
//! byte quota.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pinmark_storage::{KeyValueStore, QuotaProbe, StorageError, StorageEstimate};
use pinmark_types::{BackendTier, Records};
use tokio::sync::Mutex;
use tracing::debug;

/// Durable store backed by one JSON file.
pub struct JsonFileStore {
    name: String,
    tier: BackendTier,
    path: PathBuf,
    quota_bytes: u64,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, tier: BackendTier, quota_bytes: u64) -> Self {
        Self {
            name: format!("json-file:{tier}"),
            tier,
            path: path.into(),
            quota_bytes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Records, StorageError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(StorageError::from_host(&self.name, e.to_string())),
        };

        if contents.trim().is_empty() {
            return Ok(Records::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            StorageError::unavailable(&self.name, format!("store file is corrupt: {e}"))
        })
    }

    async fn persist(&self, records: &Records) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(records)?;
        let size = encoded.len() as u64;
        if size > self.quota_bytes {
            return Err(StorageError::quota_exceeded(
                &self.name,
                format!("write needs {size} bytes, quota is {} bytes", self.quota_bytes),
            ));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::from_host(&self.name, e.to_string()))?;
            }
        }

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, &encoded)
            .await
            .map_err(|e| StorageError::from_host(&self.name, e.to_string()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| StorageError::from_host(&self.name, e.to_string()))?;

        debug!(path = ?self.path, bytes = size, records = records.len(), "Store file written");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> BackendTier {
        self.tier
    }

    async fn get(&self, keys: &[String]) -> Result<Records, StorageError> {
        let mut records = self.load().await?;
        records.retain(|key, _| keys.contains(key));
        Ok(records)
    }

    async fn get_all(&self) -> Result<Records, StorageError> {
        self.load().await
    }

    async fn set(&self, entries: Records) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.extend(entries);
        self.persist(&records).await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        for key in keys {
            records.remove(key);
        }
        if records.len() == before {
            return Ok(());
        }
        self.persist(&records).await
    }
}

#[async_trait]
impl QuotaProbe for JsonFileStore {
    async fn estimate(&self) -> Result<StorageEstimate, StorageError> {
        let usage = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(StorageError::from_host(&self.name, e.to_string())),
        };
        Ok(StorageEstimate {
            usage,
            quota: self.quota_bytes,
        })
    }
}
