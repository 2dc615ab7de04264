//! Backend tier identifiers.
//!
//! Every key-value backend the storage layer talks to belongs to one tier.
//! Tiers are ordered by preference: the durable synced store is the primary,
//! the durable local store is the first fallback and the in-memory store is
//! the last resort.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Which class of key-value store a backend instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendTier {
    /// Durable store replicated across the user's browsers (small quota).
    DurableSynced,

    /// Durable store on the local device.
    DurableLocal,

    /// Process-lifetime store. Data is lost when the context unloads.
    InMemory,
}

impl BackendTier {
    /// All tiers, in preference order.
    pub const ALL: [BackendTier; 3] = [
        BackendTier::DurableSynced,
        BackendTier::DurableLocal,
        BackendTier::InMemory,
    ];

    /// Returns the wire name for this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendTier::DurableSynced => "durable-synced",
            BackendTier::DurableLocal => "durable-local",
            BackendTier::InMemory => "in-memory",
        }
    }

    /// Whether data written to this tier survives a restart.
    pub fn is_durable(&self) -> bool {
        !matches!(self, BackendTier::InMemory)
    }
}

impl fmt::Display for BackendTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendTier {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "durable-synced" | "sync" | "synced" => Ok(BackendTier::DurableSynced),
            "durable-local" | "local" => Ok(BackendTier::DurableLocal),
            "in-memory" | "memory" => Ok(BackendTier::InMemory),
            other => Err(TypesError::UnknownTier(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_names_roundtrip() {
        for tier in BackendTier::ALL {
            assert_eq!(tier.as_str().parse::<BackendTier>().unwrap(), tier);
        }
    }

    #[test]
    fn test_tier_aliases() {
        assert_eq!("local".parse::<BackendTier>().unwrap(), BackendTier::DurableLocal);
        assert_eq!("memory".parse::<BackendTier>().unwrap(), BackendTier::InMemory);
        assert_eq!(" Sync ".parse::<BackendTier>().unwrap(), BackendTier::DurableSynced);
        assert!("disk".parse::<BackendTier>().is_err());
    }

    #[test]
    fn test_durability() {
        assert!(BackendTier::DurableSynced.is_durable());
        assert!(BackendTier::DurableLocal.is_durable());
        assert!(!BackendTier::InMemory.is_durable());
    }

    #[test]
    fn test_serde_kebab_case() {
        let json = serde_json::to_string(&BackendTier::DurableLocal).unwrap();
        assert_eq!(json, "\"durable-local\"");
        let tier: BackendTier = serde_json::from_str("\"in-memory\"").unwrap();
        assert_eq!(tier, BackendTier::InMemory);
    }
}
