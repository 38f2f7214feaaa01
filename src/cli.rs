use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "newsroom", about = "AI news pipeline: digest, hourly collector, deep column")]
pub struct Cli {
    /// Path to configuration file (optional; env vars override)
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration and exit
    Validate,

    /// Generate the daily digest
    Run {
        /// Generate local files only, skip the WeChat draft
        #[arg(long)]
        no_publish: bool,

        /// Alias for --no-publish
        #[arg(long)]
        local_only: bool,
    },

    /// Hourly collection: fetch sources, update the archive, write the
    /// shared JSON files, push the top picks
    Collect {
        /// Skip the WeCom group-bot push
        #[arg(long)]
        no_push: bool,
    },

    /// Scan for hot topic clusters and save the candidate list
    Discover,

    /// Write and publish a deep column for candidate N (1-based; 0 skips)
    Generate {
        /// Candidate number from the discover output
        topic: usize,
    },

    /// Discover, then generate the hottest candidate
    Auto,
}
