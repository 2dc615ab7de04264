//! Storage layer error types.

use thiserror::Error;

/// Errors surfaced by the storage layer.
///
/// Classification drives the pipeline:
/// - `BackendUnavailable` is retried, then handed to the fallback chain
/// - `QuotaExceeded` skips retry, triggers one eviction pass and one more attempt
/// - `Validation` never reaches a backend
/// - `AllBackendsExhausted` wraps the primary's failure once every tier has failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// The host API threw or rejected (transient)
    #[error("Backend {backend} unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// The write was rejected for capacity
    #[error("Quota exceeded on {backend}: {message}")]
    QuotaExceeded { backend: String, message: String },

    /// Caller passed malformed keys or values
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stored record could not be decoded into the requested type
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Every tier in the fallback chain failed
    #[error("All backends exhausted; primary failure: {source}")]
    AllBackendsExhausted {
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn quota_exceeded(backend: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::QuotaExceeded {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Classify a raw host error message.
    ///
    /// Hosts report capacity failures as plain strings
    /// (e.g. `QUOTA_BYTES quota exceeded`), so anything mentioning a quota is
    /// treated as `QuotaExceeded` and everything else as transient.
    pub fn from_host(backend: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_ascii_lowercase().contains("quota") {
            Self::quota_exceeded(backend, message)
        } else {
            Self::unavailable(backend, message)
        }
    }

    /// Whether the retry executor should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::BackendUnavailable { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }

    /// Whether the fallback chain may serve this failure.
    ///
    /// Validation and decoding failures are caller errors; another tier
    /// would fail the same way.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            StorageError::BackendUnavailable { .. } | StorageError::QuotaExceeded { .. }
        )
    }

    /// The backend that produced this error, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            StorageError::BackendUnavailable { backend, .. }
            | StorageError::QuotaExceeded { backend, .. } => Some(backend),
            StorageError::AllBackendsExhausted { source } => source.backend(),
            _ => None,
        }
    }

    /// Innermost error, unwrapping `AllBackendsExhausted`.
    pub fn root_cause(&self) -> &StorageError {
        match self {
            StorageError::AllBackendsExhausted { source } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
