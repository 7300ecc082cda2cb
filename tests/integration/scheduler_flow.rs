//! Scan scheduler flows: deadlines, backoff, failure containment and
//! cooperative shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sentinel::config::{AppConfig, ScanConfig};
use sentinel::engine::enricher::{Enricher, SENTIMENT_SIGNAL};
use sentinel::engine::pipeline::DecisionPipeline;
use sentinel::engine::scanner::{ScanScheduler, ShutdownHandle};
use sentinel::journal::{Journal, MemoryJournal};
use sentinel::resilience::BoundedWorker;

use crate::mock_collaborators::{snapshot, MockFeed, MockSentiment, TrippingJournal};

/// Zero-length sleeps so loop tests run at full speed.
fn fast_scan() -> ScanConfig {
    ScanConfig {
        interval_secs: 0,
        call_timeout_ms: 50,
        min_sleep_secs: 0,
        timeout_backoff_step_secs: 0,
        timeout_backoff_cap_secs: 0,
        error_retry_secs: 0,
        shutdown_poll_ms: 5,
        worker_slots: 2,
    }
}

fn build(
    mut app: AppConfig,
    feed: Arc<MockFeed>,
    instruments: &[&str],
    journal: Arc<dyn Journal>,
    enricher: Option<Enricher>,
    shutdown: ShutdownHandle,
) -> ScanScheduler {
    app.scan = fast_scan();
    let worker = BoundedWorker::new(app.scan.worker_slots, app.scan.call_timeout());
    let enricher = enricher.unwrap_or_else(|| Enricher::new(worker.clone(), &app.breaker));
    let pipeline = DecisionPipeline::new(&app, journal).with_worker(worker);
    ScanScheduler::new(
        app.scan.clone(),
        instruments.iter().map(|s| s.to_string()).collect(),
        feed,
        enricher,
        pipeline,
        shutdown,
    )
}

#[tokio::test]
async fn test_cycle_evaluates_in_order_and_settles() {
    let feed = Arc::new(MockFeed::new(vec![
        snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0),
        snapshot("ETH-USD", 100.0, 100.5, 2.0, 50.0),
    ]));
    let journal = Arc::new(MemoryJournal::new());
    let mut scheduler = build(
        AppConfig::default(),
        feed.clone(),
        &["BTC-USD", "ETH-USD"],
        journal.clone(),
        None,
        ShutdownHandle::new(),
    );

    let report = scheduler.run_once().await;
    assert_eq!(report.instruments_scanned, 2);
    assert_eq!(report.triggered, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(report.open_positions, 1);
    assert_eq!(feed.fetches(), 2);
    assert_eq!(journal.len(), 1);
}

#[tokio::test]
async fn test_slow_feed_counts_timeouts_and_backs_off() {
    let feed = Arc::new(MockFeed::new(vec![snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0)]));
    feed.set_delay(Duration::from_millis(500));
    let shutdown = ShutdownHandle::new();
    feed.stop_after(3, shutdown.clone());

    let mut scheduler = build(
        AppConfig::default(),
        feed.clone(),
        &["BTC-USD"],
        Arc::new(MemoryJournal::new()),
        None,
        shutdown,
    );

    let started = std::time::Instant::now();
    scheduler.run().await;

    assert_eq!(scheduler.cycles(), 3);
    assert_eq!(scheduler.consecutive_timeouts(), 3);
    assert!(scheduler.pipeline().book().is_empty());
    // Three abandoned fetches, not three full delays.
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_slow_sentiment_neutral_and_timed_out() {
    let feed = Arc::new(MockFeed::new(vec![snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0)]));
    let app = AppConfig::default();
    let worker = BoundedWorker::new(1, Duration::from_millis(50));
    let enricher = Enricher::new(worker, &app.breaker)
        .with_sentiment(Arc::new(MockSentiment::slow(0.9, Duration::from_millis(500))));

    let mut scheduler = build(
        AppConfig::default(),
        feed,
        &["BTC-USD"],
        Arc::new(MemoryJournal::new()),
        Some(enricher),
        ShutdownHandle::new(),
    );

    let report = scheduler.run_once().await;
    assert!(report.timed_out());
    // Neutral sentiment does not block the trade.
    assert_eq!(report.approved, 1);
    let last = scheduler.pipeline().estimator().predictions().last().cloned().unwrap();
    assert_eq!(last.signals.get(SENTIMENT_SIGNAL), Some(&0.5));
}

#[tokio::test]
async fn test_sentiment_moves_posterior() {
    let feed = Arc::new(MockFeed::new(vec![snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0)]));
    let app = AppConfig::default();
    let worker = BoundedWorker::new(1, Duration::from_millis(200));
    let enricher = Enricher::new(worker, &app.breaker).with_sentiment(Arc::new(MockSentiment::new(0.7)));

    let mut trusting = app.clone();
    trusting
        .signals
        .initial_reliability
        .insert(SENTIMENT_SIGNAL.to_string(), 0.8);
    let mut scheduler = build(
        trusting,
        feed,
        &["BTC-USD"],
        Arc::new(MemoryJournal::new()),
        Some(enricher),
        ShutdownHandle::new(),
    );
    let report = scheduler.run_once().await;
    assert!(!report.timed_out());
    let last = scheduler.pipeline().estimator().predictions().last().cloned().unwrap();
    // 0.7 at reliability 0.8: (0.5 * 0.66) / (0.5 * 0.66 + 0.5 * 0.34)
    assert!((last.posterior - 0.66).abs() < 1e-9, "{}", last.posterior);
}

#[tokio::test]
async fn test_panicking_instrument_does_not_stop_cycle() {
    let feed = Arc::new(MockFeed::new(vec![
        snapshot("BAD-USD", 100.0, 110.0, 2.0, 30.0),
        snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0),
    ]));
    let journal = Arc::new(TrippingJournal::new("BAD-USD"));
    let mut scheduler = build(
        AppConfig::default(),
        feed,
        &["BAD-USD", "BTC-USD"],
        journal.clone(),
        None,
        ShutdownHandle::new(),
    );

    let report = scheduler.run_once().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(journal.appended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_feed_skips_only_that_instrument() {
    let feed = Arc::new(MockFeed::new(vec![
        snapshot("ETH-USD", 100.0, 100.5, 2.0, 50.0),
        snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0),
    ]));
    feed.panic_on_fetch(1);
    let journal = Arc::new(MemoryJournal::new());
    let mut scheduler = build(
        AppConfig::default(),
        feed.clone(),
        &["ETH-USD", "BTC-USD"],
        journal.clone(),
        None,
        ShutdownHandle::new(),
    );

    let report = scheduler.run_once().await;
    assert_eq!(report.instruments_scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(feed.fetches(), 2);
    assert_eq!(journal.len(), 1);
}

#[tokio::test]
async fn test_loop_keeps_cycling_after_feed_panic() {
    let feed = Arc::new(MockFeed::new(vec![
        snapshot("ETH-USD", 100.0, 100.5, 2.0, 50.0),
        snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0),
    ]));
    feed.panic_on_fetch(1);
    let shutdown = ShutdownHandle::new();
    feed.stop_after(4, shutdown.clone());
    let journal = Arc::new(MemoryJournal::new());

    let mut scheduler = build(
        AppConfig::default(),
        feed.clone(),
        &["ETH-USD", "BTC-USD"],
        journal.clone(),
        None,
        shutdown,
    );
    scheduler.run().await;

    assert_eq!(scheduler.cycles(), 2);
    assert_eq!(feed.fetches(), 4);
    // BTC-USD approved in both cycles.
    assert_eq!(journal.len(), 2);
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let feed = Arc::new(MockFeed::new(vec![snapshot("BTC-USD", 100.0, 110.0, 2.0, 50.0)]));
    let shutdown = ShutdownHandle::new();
    let mut app = AppConfig::default();
    app.scan = ScanConfig {
        interval_secs: 3_600,
        ..fast_scan()
    };
    let pipeline = DecisionPipeline::new(&app, Arc::new(MemoryJournal::new()));
    let enricher = Enricher::new(
        BoundedWorker::new(1, Duration::from_millis(50)),
        &app.breaker,
    );
    let mut scheduler = ScanScheduler::new(
        app.scan.clone(),
        vec!["BTC-USD".to_string()],
        feed,
        enricher,
        pipeline,
        shutdown.clone(),
    );

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
    };
    let started = std::time::Instant::now();
    tokio::join!(scheduler.run(), stopper);

    assert_eq!(scheduler.cycles(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}
