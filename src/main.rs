//! Round engine daemon
//!
//! Runs the round scheduler against in-memory storage and ledger until Ctrl+C.

use clap::Parser;
use round_engine::{
    config::{generate_sample_config, ConfigLoader},
    ledger::MemoryLedger,
    store::MemoryStore,
    RoundScheduler,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

/// Round lifecycle scheduler and settlement engine
#[derive(Parser)]
#[command(name = "round-engine")]
#[command(about = "Timed betting rounds with exactly-once settlement")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scheduler tick interval in milliseconds
    #[arg(short, long)]
    tick_ms: Option<u64>,

    /// Start with continuous mode off
    #[arg(long)]
    no_continuous: bool,

    /// Write a sample configuration file and exit
    #[arg(long, value_name = "PATH")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(path) = &cli.generate_config {
        generate_sample_config(path)?;
        println!("Sample configuration written to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(tick_ms) = cli.tick_ms {
        config.scheduler.tick_interval_ms = tick_ms;
    }
    if cli.no_continuous {
        config.scheduler.continuous_on_start = false;
    }
    loader.validate(&config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    info!("🎲 Starting round engine");
    info!(
        duration_secs = config.rounds.duration_secs,
        start_delay_secs = config.rounds.start_delay_secs,
        outcome_range = config.rounds.outcome_range,
        tick_ms = config.scheduler.tick_interval_ms,
        "Round configuration"
    );

    let tick_interval = config.scheduler.tick_interval();
    let continuous = config.scheduler.continuous_on_start;

    let scheduler = Arc::new(
        RoundScheduler::builder(config)
            .with_store(Arc::new(MemoryStore::new()))
            .with_ledger(Arc::new(MemoryLedger::new()))
            .build()?,
    );

    if continuous {
        match scheduler.enable_continuous().await? {
            Some(round) => info!(round = round.sequence_number, state = %round.state, "Continuous mode running"),
            None => warn!("Continuous mode enabled but no round is active yet"),
        }
    } else {
        info!("Continuous mode off; waiting for manual rounds");
    }

    let handle = scheduler.clone().spawn(tick_interval);

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received");

    let reports = scheduler.disable_continuous().await?;
    handle.shutdown().await?;

    for report in &reports {
        info!(
            round = report.round_sequence,
            settled = report.wagers_settled,
            paid_out = report.total_paid_out,
            "Closed on shutdown"
        );
    }

    let pending = scheduler.reconciliation_queue();
    if !pending.is_empty() {
        warn!(count = pending.len(), "Reconciliation items outstanding at shutdown");
        for item in &pending {
            warn!("{}", serde_json::to_string(item)?);
        }
    }

    info!("📊 Final metrics: {}", serde_json::to_string(&scheduler.metrics())?);
    info!("✅ Round engine stopped");
    Ok(())
}
