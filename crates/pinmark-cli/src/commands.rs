//! Command implementations for the pinmark binary.
//!
//! Handles:
//! - get: Read records and print them as JSON
//! - set: Write one record
//! - remove: Delete records
//! - usage: Print the store's quota usage

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use pinmark_storage::{BackendRegistry, InMemoryStore, QuotaObserver, Served, StorageFacade};
use pinmark_types::{BackendTier, Platform, Records, StorageSettings, UsageSnapshot};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::file_store::JsonFileStore;

/// Default store file path.
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "pinmark")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("store.json")
}

/// Prints quota alerts to stderr.
pub struct ConsoleQuotaObserver;

impl QuotaObserver for ConsoleQuotaObserver {
    fn on_quota_warning(&self, snapshot: &UsageSnapshot) {
        eprintln!("warning: store is {:.1}% full", snapshot.usage_percent);
    }

    fn on_quota_approaching(&self, snapshot: &UsageSnapshot) {
        eprintln!(
            "warning: store is nearly full ({} bytes left), old records will be evicted soon",
            snapshot.available_bytes
        );
    }

    fn on_quota_critical(&self, snapshot: &UsageSnapshot) {
        eprintln!(
            "critical: store is {:.1}% full, evicting records",
            snapshot.usage_percent
        );
    }
}

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<StorageSettings> {
    let mut settings = StorageSettings::load(cli.platform.map(Platform::from), cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }

    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Wire the file store as the primary tier with an in-memory fallback.
pub fn build_facade(
    settings: StorageSettings,
    store_path: PathBuf,
    quota_bytes: u64,
) -> Result<StorageFacade> {
    let file_store = Arc::new(JsonFileStore::new(
        store_path,
        settings.primary_tier,
        quota_bytes,
    ));
    info!(path = ?file_store.path(), quota_bytes, "Opening store");

    let mut registry = BackendRegistry::new().with_backend(file_store.clone());
    if settings.primary_tier != BackendTier::InMemory {
        registry.register(Arc::new(InMemoryStore::new("memory", BackendTier::InMemory)));
    }

    StorageFacade::builder(registry)
        .with_settings(settings)
        .with_probe(file_store)
        .with_observer(Arc::new(ConsoleQuotaObserver))
        .build()
        .context("Failed to build storage facade")
}

/// Parse a CLI value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn report_tier<T>(served: &Served<T>) {
    if !served.durable {
        warn!(tier = %served.tier, "Primary store unavailable, change is NOT saved to disk");
        eprintln!("warning: served by {} ({}), data will not persist", served.backend, served.tier);
    } else if served.fallback_used {
        eprintln!("note: served by fallback {} ({})", served.backend, served.tier);
    }
}

pub async fn handle_get(facade: &StorageFacade, keys: Vec<String>) -> Result<Records> {
    let served = facade.get(keys).await.context("Get failed")?;
    report_tier(&served);
    Ok(served.into_inner())
}

pub async fn handle_set(facade: &StorageFacade, key: String, raw_value: &str) -> Result<()> {
    let mut entries = Records::new();
    entries.insert(key, parse_value(raw_value));
    let served = facade.set(entries).await.context("Set failed")?;
    report_tier(&served);
    Ok(())
}

pub async fn handle_remove(facade: &StorageFacade, keys: Vec<String>) -> Result<()> {
    let served = facade.remove(keys).await.context("Remove failed")?;
    report_tier(&served);
    Ok(())
}

pub async fn handle_usage(facade: &StorageFacade, force: bool) -> Result<Arc<UsageSnapshot>> {
    Ok(facade.get_usage(force).await)
}

/// Run one parsed command end to end.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    let store_path = cli.store.clone().unwrap_or_else(default_store_path);
    let facade = build_facade(settings, store_path, cli.quota_bytes)?;

    match cli.command {
        Commands::Get { keys } => {
            let records = handle_get(&facade, keys).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Set { key, value } => {
            handle_set(&facade, key, &value).await?;
        }
        Commands::Remove { keys } => {
            handle_remove(&facade, keys).await?;
        }
        Commands::Usage { force } => {
            let usage = handle_usage(&facade, force).await?;
            println!("{}", serde_json::to_string_pretty(usage.as_ref())?);
        }
    }

    facade.flush().await;
    Ok(())
}
