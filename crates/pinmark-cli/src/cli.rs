//! CLI argument parsing for the pinmark binary.
//!
//! Flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pinmark_types::Platform;

/// Default store quota, matching the synced extension store.
pub const DEFAULT_QUOTA_BYTES: u64 = 102_400;

/// Pinmark storage tool
///
/// Reads and writes records through the resilient storage layer.
#[derive(Parser, Debug)]
#[command(name = "pinmark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (in addition to the default pinmark config)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Platform preset to start from (safari, chrome, firefox)
    #[arg(short, long, global = true, value_enum, ignore_case = true)]
    pub platform: Option<PlatformArg>,

    /// Store file (default: <data dir>/pinmark/store.json)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Byte quota enforced on the store file
    #[arg(short, long, global = true, default_value_t = DEFAULT_QUOTA_BYTES)]
    pub quota_bytes: u64,

    #[command(subcommand)]
    pub command: Commands,
}

/// Storage commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the records stored under one or more keys
    Get {
        /// Keys to read
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Store a value under a key
    Set {
        /// Key to write
        key: String,

        /// JSON value; anything that is not valid JSON is stored as a string
        value: String,
    },

    /// Delete one or more keys
    Remove {
        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show quota usage of the store
    Usage {
        /// Bypass the cached snapshot
        #[arg(short, long)]
        force: bool,
    },
}

/// Platform preset names accepted on the command line.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum PlatformArg {
    Safari,
    Chrome,
    Firefox,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Safari => Platform::Safari,
            PlatformArg::Chrome => Platform::Chrome,
            PlatformArg::Firefox => Platform::Firefox,
        }
    }
}
