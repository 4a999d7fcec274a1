//! trendflow binary.
//!
//! `trendflow run` starts the live pipeline: one feed session driving the
//! tick-processing engine, one background writer draining the record queues
//! into SQLite. Ctrl-C (or market close) triggers the cooperative shutdown
//! path: open candles are finalized and the writer drains before exit.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use tokio::sync::watch;

use trendflow_core::{load_basket, AppConfig, ConfigLoader, InstrumentSet};
use trendflow_data::{writer_pipeline, DatabaseClient};
use trendflow_engine::Engine;
use trendflow_feed::{FeedError, SessionManager};

#[derive(Parser)]
#[command(name = "trendflow")]
#[command(about = "Cash-flow driven market-data pipeline for index options", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live pipeline
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Initialize the database schema and exit
    InitDb {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = ConfigLoader::load_from(&config)?;
            run_pipeline(config).await
        }
        Commands::InitDb { config } => {
            let config = ConfigLoader::load_from(&config)?;
            let db = open_database(&config, 1).await?;
            db.init_schema().await?;
            tracing::info!(path = %config.database.path, "Database initialized");
            Ok(())
        }
    }
}

async fn open_database(config: &AppConfig, max_connections: u32) -> Result<DatabaseClient> {
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    DatabaseClient::connect(&config.database.path, max_connections).await
}

async fn run_pipeline(config: AppConfig) -> Result<()> {
    tracing::info!("trendflow starting");

    let basket = match load_basket(&config.instruments.basket_path) {
        Ok(basket) => basket,
        Err(e) => {
            tracing::warn!(
                "No option basket loaded ({e}); running with index and future only"
            );
            Vec::new()
        }
    };
    let instruments = InstrumentSet::build(
        &config.instruments.index_key,
        &config.instruments.future_key,
        &basket,
    );
    tracing::info!(
        instruments = instruments.len(),
        options = basket.len(),
        "Instrument registry built"
    );

    // One dedicated connection for the background writer, a small pool for
    // the inline signal/cash-flow/audit writes.
    let writer_db = open_database(&config, 1).await?;
    writer_db.init_schema().await?;
    let inline_db = open_database(&config, 2).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let suffixes = instruments
        .iter()
        .map(|(key, spec)| (key.clone(), spec.table_suffix.clone()))
        .collect();
    let (writer_handles, writer) = writer_pipeline(writer_db, suffixes, shutdown_rx.clone());
    let writer_task = tokio::spawn(writer.run());

    let mut engine = Engine::new(instruments.clone(), &basket, inline_db, writer_handles);
    let mut session = SessionManager::new(config.feed.clone(), instruments.keys(), shutdown_rx);

    let ctrl_c_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
            let _ = ctrl_c_shutdown.send(true);
        }
    });

    match session.run(&mut engine).await {
        Ok(()) => tracing::info!("Feed session ended"),
        Err(FeedError::MaxAttempts(attempts)) => {
            tracing::error!(attempts, "Giving up after repeated connection failures");
        }
        Err(e) => tracing::error!("Feed session failed: {e}"),
    }

    // Stop the writer and let it drain whatever is still queued.
    let _ = shutdown_tx.send(true);
    writer_task
        .await
        .context("Writer task panicked before draining")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
