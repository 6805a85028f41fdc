//! # lore-forest CLI (`loref`)
//!
//! The `loref` binary drives the reconstruction pipeline over a mirrored
//! mailing-list archive.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loref sync` | Clone or update the archive mirror |
//! | `loref build` | Reconstruct reply trees and report the forest shape |
//! | `loref verify` | Check each message's permalink against the remote archive |
//! | `loref chunk` | Split message bodies into bounded, typed chunks |
//! | `loref stats` | Print the forest statistics table |
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file; `build`, `verify`, `chunk`, and `stats` additionally accept
//! `--limit`, `--since`, and `--until` to bound the archive window.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lore_forest::archive::GitArchive;
use lore_forest::config::load_config;
use lore_forest::pipeline;

/// lore-forest CLI — thread reconstruction and link verification for
/// lore mailing-list mirrors.
#[derive(Parser)]
#[command(
    name = "loref",
    about = "lore-forest — thread reconstruction, chunking, and link verification for lore mirrors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/loref.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Bounds on the archive window shared by the read commands.
#[derive(clap::Args)]
struct Window {
    /// Maximum number of messages to read from the mirror.
    #[arg(long)]
    limit: Option<usize>,

    /// Only messages mirrored on or after this date (YYYY-MM-DD).
    #[arg(long)]
    since: Option<String>,

    /// Only messages mirrored on or before this date (YYYY-MM-DD).
    #[arg(long)]
    until: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or update the local archive mirror.
    Sync,

    /// Reconstruct reply trees from the mirrored messages.
    ///
    /// Messages with parents outside the window become pseudo-roots;
    /// duplicates and unparseable messages are excluded and counted.
    Build {
        #[command(flatten)]
        window: Window,

        /// Emit the reconstructed forest as pretty-printed JSON.
        #[arg(long)]
        json: bool,
    },

    /// Verify each message's permalink against the remote archive.
    ///
    /// Fetches the raw remote representation and fuzzy-matches it against
    /// the local record on a small bounded worker pool.
    Verify {
        #[command(flatten)]
        window: Window,
    },

    /// Split message bodies into bounded, priority-tagged chunks.
    Chunk {
        #[command(flatten)]
        window: Window,
    },

    /// Print forest statistics.
    Stats {
        #[command(flatten)]
        window: Window,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let archive = GitArchive::new(&config.archive);

    match cli.command {
        Commands::Sync => pipeline::run_sync(&config)?,
        Commands::Build { window, json } => {
            pipeline::run_build(
                &config,
                &archive,
                window.limit,
                window.since.as_deref(),
                window.until.as_deref(),
                json,
            )?;
        }
        Commands::Verify { window } => {
            pipeline::run_verify(
                &config,
                &archive,
                window.limit,
                window.since.as_deref(),
                window.until.as_deref(),
            )
            .await?;
        }
        Commands::Chunk { window } => {
            pipeline::run_chunk(
                &config,
                &archive,
                window.limit,
                window.since.as_deref(),
                window.until.as_deref(),
            )?;
        }
        Commands::Stats { window } => {
            pipeline::run_stats(
                &config,
                &archive,
                window.limit,
                window.since.as_deref(),
                window.until.as_deref(),
            )?;
        }
    }

    Ok(())
}
