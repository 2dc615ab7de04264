//! Configuration loading for the pinmark storage layer.
//!
//! Layered config: defaults -> platform preset -> config file -> env vars.
//! The default config file lives at `<config dir>/pinmark/config.{toml,json,yaml}`.
//! Environment overrides use the `PINMARK_` prefix with `__` between nested
//! keys, e.g. `PINMARK_MAX_RETRIES=5` or `PINMARK_FALLBACK_CHAIN=in-memory`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::tier::BackendTier;
use crate::usage::QuotaThresholds;

/// Browser platform the extension is running on.
///
/// Each platform ships a preset tuned to its storage implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Safari,
    #[default]
    Chrome,
    Firefox,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Safari => "safari",
            Platform::Chrome => "chrome",
            Platform::Firefox => "firefox",
        }
    }
}

/// Storage layer settings.
///
/// Every field has a default; any subset may be overridden per platform or
/// deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Usage percentage at which a warning is emitted
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,

    /// Usage percentage at which the predictive "approaching critical" notice is emitted
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: f64,

    /// Usage percentage at which a critical alert fires and eviction runs
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,

    /// Attempts per operation, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single retry delay (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive retry delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How long a usage snapshot stays fresh (ms)
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Buffered operations that force an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush window measured from the first enqueue after a flush (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Route facade calls through the batch queue
    #[serde(default = "default_enable_batching")]
    pub enable_batching: bool,

    /// Cap on removals per eviction pass
    #[serde(default = "default_eviction_max_removals")]
    pub eviction_max_removals: usize,

    /// Tier that serves operations first
    #[serde(default = "default_primary_tier")]
    pub primary_tier: BackendTier,

    /// Tiers tried in order when the primary fails
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<BackendTier>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_warning_threshold() -> f64 {
    80.0
}

fn default_cleanup_threshold() -> f64 {
    90.0
}

fn default_critical_threshold() -> f64 {
    95.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_cache_timeout_ms() -> u64 {
    30_000
}

fn default_batch_size() -> usize {
    10
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_enable_batching() -> bool {
    true
}

fn default_eviction_max_removals() -> usize {
    5
}

fn default_primary_tier() -> BackendTier {
    BackendTier::DurableSynced
}

fn default_fallback_chain() -> Vec<BackendTier> {
    vec![BackendTier::DurableLocal, BackendTier::InMemory]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            cleanup_threshold: default_cleanup_threshold(),
            critical_threshold: default_critical_threshold(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            cache_timeout_ms: default_cache_timeout_ms(),
            batch_size: default_batch_size(),
            debounce_ms: default_debounce_ms(),
            enable_batching: default_enable_batching(),
            eviction_max_removals: default_eviction_max_removals(),
            primary_tier: default_primary_tier(),
            fallback_chain: default_fallback_chain(),
            log_level: default_log_level(),
        }
    }
}

impl StorageSettings {
    /// Preset for a browser platform.
    pub fn for_platform(platform: Platform) -> Self {
        let base = Self::default();
        match platform {
            Platform::Safari => Self {
                max_retries: 3,
                base_delay_ms: 150,
                max_delay_ms: 1500,
                warning_threshold: 80.0,
                cleanup_threshold: 90.0,
                critical_threshold: 95.0,
                cache_timeout_ms: 30_000,
                batch_size: 10,
                ..base
            },
            Platform::Chrome => Self {
                max_retries: 2,
                base_delay_ms: 100,
                max_delay_ms: 1000,
                warning_threshold: 90.0,
                cleanup_threshold: 95.0,
                critical_threshold: 98.0,
                cache_timeout_ms: 30_000,
                batch_size: 15,
                ..base
            },
            Platform::Firefox => Self {
                max_retries: 3,
                base_delay_ms: 200,
                max_delay_ms: 2000,
                warning_threshold: 85.0,
                cleanup_threshold: 90.0,
                critical_threshold: 95.0,
                cache_timeout_ms: 45_000,
                batch_size: 8,
                ..base
            },
        }
    }

    /// Load settings with layered precedence:
    /// 1. Built-in defaults (or the platform preset when one is given)
    /// 2. Config file (`<config dir>/pinmark/config.*`)
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (`PINMARK_*`)
    pub fn load(platform: Option<Platform>, config_path: Option<&str>) -> Result<Self, TypesError> {
        let preset = platform.map(Self::for_platform).unwrap_or_default();

        let config_dir = ProjectDirs::from("", "", "pinmark")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("warning_threshold", preset.warning_threshold)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("cleanup_threshold", preset.cleanup_threshold)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("critical_threshold", preset.critical_threshold)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("max_retries", preset.max_retries as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("base_delay_ms", preset.base_delay_ms as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("max_delay_ms", preset.max_delay_ms as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("cache_timeout_ms", preset.cache_timeout_ms as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("batch_size", preset.batch_size as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("log_level", preset.log_level.clone())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PINMARK")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("fallback_chain")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Self = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        settings.validate().map_err(TypesError::Config)?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.thresholds().validate()?;
        if self.max_retries == 0 {
            return Err("max_retries must be >= 1".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.cache_timeout_ms == 0 {
            return Err("cache_timeout_ms must be > 0".to_string());
        }
        if self.fallback_chain.contains(&self.primary_tier) {
            return Err(format!(
                "fallback_chain must not contain the primary tier {}",
                self.primary_tier
            ));
        }
        Ok(())
    }

    /// Quota thresholds as a single value.
    pub fn thresholds(&self) -> QuotaThresholds {
        QuotaThresholds::new(
            self.warning_threshold,
            self.cleanup_threshold,
            self.critical_threshold,
        )
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = StorageSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.base_delay_ms, 100);
        assert_eq!(settings.max_delay_ms, 1000);
        assert_eq!(settings.cache_timeout_ms, 30_000);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.debounce_ms, 100);
        assert_eq!(settings.eviction_max_removals, 5);
        assert_eq!(settings.primary_tier, BackendTier::DurableSynced);
        assert_eq!(
            settings.fallback_chain,
            vec![BackendTier::DurableLocal, BackendTier::InMemory]
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_platform_presets_valid() {
        for platform in [Platform::Safari, Platform::Chrome, Platform::Firefox] {
            let settings = StorageSettings::for_platform(platform);
            assert!(
                settings.validate().is_ok(),
                "preset for {} should validate",
                platform.as_str()
            );
        }
    }

    #[test]
    fn test_platform_preset_values() {
        let chrome = StorageSettings::for_platform(Platform::Chrome);
        assert_eq!(chrome.max_retries, 2);
        assert_eq!(chrome.batch_size, 15);
        assert_eq!(chrome.critical_threshold, 98.0);

        let firefox = StorageSettings::for_platform(Platform::Firefox);
        assert_eq!(firefox.base_delay_ms, 200);
        assert_eq!(firefox.cache_timeout_ms, 45_000);
        assert_eq!(firefox.batch_size, 8);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = StorageSettings::default();
        settings.max_retries = 0;
        assert!(settings.validate().is_err());

        let mut settings = StorageSettings::default();
        settings.cleanup_threshold = 99.0;
        assert!(settings.validate().is_err());

        let mut settings = StorageSettings::default();
        settings.max_delay_ms = 10;
        assert!(settings.validate().is_err());

        let mut settings = StorageSettings::default();
        settings.backoff_multiplier = 0.5;
        assert!(settings.validate().is_err());

        let mut settings = StorageSettings::default();
        settings.batch_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = StorageSettings::default();
        settings.fallback_chain = vec![BackendTier::DurableSynced];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: StorageSettings =
            serde_json::from_str(r#"{"batch_size": 4, "fallback_chain": ["in-memory"]}"#).unwrap();
        assert_eq!(settings.batch_size, 4);
        assert_eq!(settings.fallback_chain, vec![BackendTier::InMemory]);
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = std::env::temp_dir().join(format!("pinmark-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, r#"{"debounce_ms": 250, "enable_batching": false}"#).unwrap();

        let settings =
            StorageSettings::load(Some(Platform::Firefox), Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.debounce_ms, 250);
        assert!(!settings.enable_batching);
        assert_eq!(settings.base_delay_ms, 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_durations() {
        let settings = StorageSettings::default();
        assert_eq!(settings.base_delay(), Duration::from_millis(100));
        assert_eq!(settings.max_delay(), Duration::from_secs(1));
        assert_eq!(settings.cache_timeout(), Duration::from_secs(30));
        assert_eq!(settings.debounce(), Duration::from_millis(100));
    }
}
