//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// netresolv - layered DNS resolver configuration
///
/// Collects resolver settings published by several configuration layers and
/// keeps a single merged resolver spec up to date.
#[derive(Parser, Debug)]
#[command(name = "netresolv")]
#[command(version)]
#[command(about = "Merge layered DNS resolver configuration into one operational spec")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the merge controller until interrupted
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Merge the configured layers once and print the result as JSON
    Merge {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
