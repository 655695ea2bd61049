use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use clawtrap::config::Config;
use clawtrap::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "clawtrap")]
#[command(author, version, about = "AI-agent gateway deception endpoint")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the telemetry pipeline
    Start,

    /// Show the latest persisted stats snapshot
    Stats,

    /// Show the effective configuration
    Config,
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Start => start(config).await,
        Commands::Stats => stats(config),
        Commands::Config => show_config(config),
    }
}

async fn start(config: Config) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let tasks = pipeline.spawn_background_tasks();

    info!(
        "clawtrap posing as {} on {}:{}",
        pipeline.config().general.service_name,
        pipeline.config().listeners.host,
        pipeline.config().listeners.port
    );
    info!(
        "Canary prefix: {}",
        pipeline.config().canary.prefix
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    for task in tasks {
        task.abort();
    }
    pipeline.shutdown().await;
    Ok(())
}

fn stats(config: Config) -> Result<()> {
    let path = config.stats_path();
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("No stats snapshot at {}", path.display()))?;
    // re-encode so partial/older snapshots still print uniformly
    let snapshot: clawtrap::models::StatsSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt stats snapshot at {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn show_config(config: Config) -> Result<()> {
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
