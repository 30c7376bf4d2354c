//! # ic-daemon
//!
//! Background scheduler for icommit.
//!
//! Runs the engine's recurring passes against one SQLite database:
//! - daily: materialize obligations over the horizon, then sweep
//!   overdue ones into missed + settlement
//! - hourly: retry settlements whose backoff has elapsed
//!
//! The request-handling layer (HTTP, bot, whatever fronts the engine)
//! is a separate process; this daemon owns only the clock-driven work.
//! Passes block on storage I/O, so they run on the blocking pool and
//! the scheduler loop only owns the timers.
//!
//! ## Usage
//!
//! ```text
//! ic-daemon --db icommit.db
//! ic-daemon --config icommit.toml --once
//! ```

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use ic_engine::{Engine, EngineStore, LogSink};

use crate::config::DaemonConfig;

const PASS_RETRY_DELAY: Duration = Duration::from_secs(60);

/// icommit background scheduler.
#[derive(Parser)]
#[command(name = "ic-daemon", version, about = "icommit background scheduler")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the engine database (overrides the config file).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run one daily pass plus one retry pass, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ic_engine=info".parse()?)
                .add_directive("ic_daemon=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    tracing::info!("starting ic-daemon");
    tracing::info!("database: {}", config.db_path.display());

    let store = EngineStore::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    let mut engine = Engine::new(store, config.engine.clone());
    if let Some(events_log) = &config.events_log {
        engine.add_sink(Box::new(LogSink::new(events_log)));
        tracing::info!("events log: {}", events_log.display());
    }

    let pass_attempts = config.engine.materializer_pass_attempts;

    if cli.once {
        let engine = daily_pass(engine, pass_attempts).await?;
        retry_pass(engine).await?;
        return Ok(());
    }

    let mut daily = interval(Duration::from_secs(config.daily_interval_secs.max(1)));
    let mut hourly = interval(Duration::from_secs(config.retry_interval_secs.max(1)));
    daily.set_missed_tick_behavior(MissedTickBehavior::Delay);
    hourly.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = daily.tick() => {
                engine = daily_pass(engine, pass_attempts).await?;
            }
            _ = hourly.tick() => {
                engine = retry_pass(engine).await?;
            }
        }
    }
}

/// Materialize then sweep, as of today, on the blocking pool.
async fn daily_pass(engine: Engine, pass_attempts: u32) -> Result<Engine> {
    tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        run_daily(&mut engine, pass_attempts);
        engine
    })
    .await
    .context("daily pass worker panicked")
}

/// Re-drive retryable settlements on the blocking pool.
async fn retry_pass(engine: Engine) -> Result<Engine> {
    tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        run_retry(&mut engine);
        engine
    })
    .await
    .context("settlement retry worker panicked")
}

/// A transient materialization failure retries the pass a bounded
/// number of times, then abandons it until the next tick — both
/// passes are idempotent, so a rerun is safe.
fn run_daily(engine: &mut Engine, pass_attempts: u32) {
    let today = Utc::now().date_naive();

    for attempt in 1..=pass_attempts {
        match engine.materialize(today) {
            Ok(outcome) => {
                tracing::info!(
                    goals = outcome.goals_processed,
                    created = outcome.created,
                    failures = outcome.failures,
                    "materialization pass done"
                );
                break;
            }
            Err(e) if e.is_transient() && attempt < pass_attempts => {
                tracing::warn!(attempt, "materialization pass failed, retrying: {e}");
                std::thread::sleep(PASS_RETRY_DELAY);
            }
            Err(e) => {
                tracing::error!("materialization pass abandoned until next tick: {e}");
                break;
            }
        }
    }

    match engine.sweep(today, Utc::now()) {
        Ok(outcome) => tracing::info!(
            missed = outcome.missed,
            excused = outcome.excused,
            settled = outcome.settled,
            goals_expired = outcome.goals_expired,
            "sweep pass done"
        ),
        Err(e) => tracing::error!("sweep pass failed: {e}"),
    }
}

fn run_retry(engine: &mut Engine) {
    match engine.retry_due_settlements(Utc::now()) {
        Ok(settled) => {
            if settled > 0 {
                tracing::info!(settled, "settlement retry pass done");
            }
        }
        Err(e) => tracing::error!("settlement retry pass failed: {e}"),
    }
}
