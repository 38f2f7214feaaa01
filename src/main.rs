mod archive;
mod classify;
mod cli;
mod cluster;
mod collect;
mod column;
mod config;
mod dedup;
mod error;
mod extract;
mod fetch;
mod filter;
mod keywords;
mod llm;
mod models;
mod normalize;
mod publish;
mod render;
mod report;
mod shared;
mod sources;
mod summarize;
mod translate;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config =
        load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.newsroom.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    validate_config(&config).context("config validation failed")?;
    info!(config_path = %cli.config.display(), "config loaded and validated");

    let outcome = match cli.command {
        Commands::Validate => {
            println!("Configuration is valid.");
            Ok(true)
        }
        Commands::Run { no_publish, local_only } => {
            let publish = !(no_publish || local_only);
            if !publish {
                info!("local-only run, WeChat publish disabled");
            }
            report::run_daily(&config, publish).await
        }
        Commands::Collect { no_push } => collect::run_collect(&config, !no_push).await,
        Commands::Discover => column::discover(&config).await,
        Commands::Generate { topic } => {
            if topic == 0 {
                println!("跳过本次专栏");
                Ok(true)
            } else {
                column::generate(&config, topic - 1).await
            }
        }
        Commands::Auto => column::auto(&config).await,
    };

    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => {
            error!("pipeline finished without a publishable result");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = ?e, "pipeline failed");
            std::process::exit(1);
        }
    }
}
