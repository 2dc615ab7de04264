//! Pinmark CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (get, set, remove, usage)
//! - `file_store`: JSON file backend used as the durable tier

pub mod cli;
pub mod commands;
pub mod file_store;

pub use cli::{Cli, Commands, PlatformArg, DEFAULT_QUOTA_BYTES};
pub use commands::{
    build_facade, default_store_path, handle_get, handle_remove, handle_set, handle_usage,
    init_logging, load_settings, parse_value, run, ConsoleQuotaObserver,
};
pub use file_store::JsonFileStore;
