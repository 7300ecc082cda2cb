//! SENTINEL: risk-gated trade-decision pipeline.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the pipeline to a file snapshot feed and an in-memory journal,
//! and runs the scan loop until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use sentinel::alerts::{LogNotifier, NotificationSink};
use sentinel::config;
use sentinel::data::{FileSnapshotSource, SnapshotSource};
use sentinel::engine::enricher::Enricher;
use sentinel::engine::pipeline::DecisionPipeline;
use sentinel::engine::scanner::{ScanScheduler, ShutdownHandle};
use sentinel::journal::MemoryJournal;
use sentinel::resilience::BoundedWorker;

const BANNER: &str = r#"
 ___  ___  _  _  _____  ___  _  _  ___  _
/ __|| __|| \| ||_   _||_ _|| \| || __|| |
\__ \| _| | .` |  | |   | | | .` || _| | |__
|___/|___||_|\_|  |_|  |___||_|\_||___||____|

  Risk-gated trade decisions (paper)
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        starting_capital = cfg.agent.starting_capital,
        instruments = cfg.agent.instruments.len(),
        interval_secs = cfg.scan.interval_secs,
        feed = %cfg.agent.feed_path,
        "SENTINEL starting up"
    );

    // -- Initialise components -------------------------------------------

    let journal = Arc::new(MemoryJournal::new());
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);
    let source: Arc<dyn SnapshotSource> = Arc::new(FileSnapshotSource::new(&cfg.agent.feed_path));

    // One worker shared by every guarded advisor call.
    let worker = BoundedWorker::new(cfg.scan.worker_slots, cfg.scan.call_timeout());
    let enricher = Enricher::new(worker.clone(), &cfg.breaker);
    let pipeline = DecisionPipeline::new(&cfg, journal.clone())
        .with_worker(worker)
        .with_notifier(notifier);

    let shutdown = ShutdownHandle::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received.");
                    shutdown.trigger();
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }

    let mut scheduler = ScanScheduler::new(
        cfg.scan.clone(),
        cfg.agent.instruments.clone(),
        source,
        enricher,
        pipeline,
        shutdown,
    );

    info!("Entering main loop. Press Ctrl+C to stop.");
    scheduler.run().await;

    // -- Final report ----------------------------------------------------

    let pipeline = scheduler.pipeline();
    pipeline.log_report();

    let stats = journal.stats();
    let portfolio = pipeline.portfolio();
    info!(
        portfolio = format!("${:.2}", portfolio.value),
        return_pct = format!("{:.2}%", portfolio.return_pct() * 100.0),
        cycles = scheduler.cycles(),
        trades = stats.total_trades,
        win_rate = format!("{:.1}%", stats.win_rate * 100.0),
        pnl = format!("${:.2}", stats.total_pnl),
        profit_factor = format!("{:.2}", stats.profit_factor),
        sharpe = format!("{:.2}", stats.sharpe),
        max_drawdown = format!("{:.1}%", stats.max_drawdown * 100.0),
        brier = format!("{:.4}", stats.brier_score),
        open_positions = pipeline.book().len(),
        "SENTINEL shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentinel=info"));

    let json_logging = std::env::var("SENTINEL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
