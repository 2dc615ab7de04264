//! Pinmark storage tool
//!
//! Reads and writes extension records through the resilient storage layer,
//! backed by a JSON file with an in-memory fallback.
//!
//! # Usage
//!
//! ```bash
//! pinmark get settings auth_token
//! pinmark set recent_tags '["rust","async"]'
//! pinmark remove auth_token
//! pinmark usage [--force]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults, or the `--platform` preset
//! 2. Config file (<config dir>/pinmark/config.toml)
//! 3. `--config` file
//! 4. Environment variables (PINMARK_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use pinmark_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
