//! End-to-end decision pipeline flows.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use sentinel::alerts::{Channel, NotificationSink};
use sentinel::config::AppConfig;
use sentinel::engine::enricher::Enrichment;
use sentinel::engine::pipeline::{Decision, DecisionPipeline, Gate, TECHNICAL_SIGNAL};
use sentinel::journal::{JournalRecord, MemoryJournal};
use sentinel::resilience::{BoundedWorker, CircuitState};
use sentinel::types::{OutcomeLabel, Side};

use crate::mock_collaborators::{snapshot, MockValidator, RecordingNotifier};

fn noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_oversold_setup_is_approved_and_journaled() {
    let journal = Arc::new(MemoryJournal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let validator = Arc::new(MockValidator::approving(0.9));

    let mut pipeline = DecisionPipeline::new(&AppConfig::default(), journal.clone())
        .with_validator(validator.clone())
        .with_notifier(notifier.clone() as Arc<dyn NotificationSink>);

    let snap = snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0);
    let trace = pipeline
        .evaluate_with(&snap, &Enrichment::default(), noon())
        .await
        .unwrap();

    match &trace.decision {
        Decision::Approved { plan, size_usd, .. } => {
            assert_eq!(plan.side, Side::Buy);
            assert!((plan.target_price - 102.0).abs() < 1e-9);
            assert!((plan.stop_price - 99.0).abs() < 1e-9);
            assert_eq!(*size_usd, 20.0);
        }
        other => panic!("expected approval, got {other:?}"),
    }
    assert_eq!(trace.gates.len(), 8);
    assert_eq!(validator.calls(), 1);
    assert!(trace.validation.as_ref().unwrap().approved);

    let records = journal.records();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], JournalRecord::Entry(_)));

    // Notifications are fire-and-forget.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifier.on(Channel::Signals).len(), 1);
    let executor = notifier.on(Channel::Executor);
    assert_eq!(executor.len(), 1);
    assert!(executor[0].contains("[PAPER] BUY BTC-USD $20.00"), "{}", executor[0]);
}

#[tokio::test]
async fn test_neutral_rsi_rejected_at_trigger() {
    let mut pipeline = DecisionPipeline::new(&AppConfig::default(), Arc::new(MemoryJournal::new()));
    let snap = snapshot("BTC-USD", 100.0, 110.0, 2.0, 50.0);
    let trace = pipeline.evaluate(&snap).await.unwrap();

    assert_eq!(trace.rejected_at(), Some(Gate::Trigger));
    let reason = trace.rejection_reason().unwrap();
    assert!(reason.contains("Z=-5.00"), "{reason}");
    assert!(reason.contains("RSI=50.0"), "{reason}");
    assert!(!trace.triggered());
}

#[tokio::test]
async fn test_overbought_setup_sells() {
    let mut pipeline = DecisionPipeline::new(&AppConfig::default(), Arc::new(MemoryJournal::new()));
    let snap = snapshot("ETH-USD", 120.0, 110.0, 2.0, 75.0);
    let trace = pipeline
        .evaluate_with(&snap, &Enrichment::default(), noon())
        .await
        .unwrap();

    assert!(trace.is_approved(), "{:?}", trace.decision);
    let plan = trace.plan.unwrap();
    assert_eq!(plan.side, Side::Sell);
    assert!(plan.target_price < plan.entry_price);
    assert!(plan.stop_price > plan.entry_price);
}

#[tokio::test]
async fn test_validator_timeout_fails_closed() {
    let mut config = AppConfig::default();
    config.scan.call_timeout_ms = 50;
    let validator = Arc::new(MockValidator::approving(0.99));
    validator.set_delay(Duration::from_millis(500));

    let mut pipeline = DecisionPipeline::new(&config, Arc::new(MemoryJournal::new()))
        .with_validator(validator.clone());

    let snap = snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0);
    let started = std::time::Instant::now();
    let trace = pipeline
        .evaluate_with(&snap, &Enrichment::default(), noon())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(trace.rejected_at(), Some(Gate::Validator));
    assert_eq!(trace.timeouts, 1);
    let verdict = trace.validation.unwrap();
    assert!(!verdict.approved);
    assert_eq!(verdict.confidence, 0.0);
    assert_eq!(pipeline.validator_breaker().failures, 1);
    assert!(pipeline.book().is_empty());
}

#[tokio::test]
async fn test_validator_breaker_opens_and_skips_calls() {
    let validator = Arc::new(MockValidator::failing("upstream 503"));
    let mut pipeline = DecisionPipeline::new(&AppConfig::default(), Arc::new(MemoryJournal::new()))
        .with_validator(validator.clone());
    let snap = snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0);

    for _ in 0..2 {
        let trace = pipeline.evaluate(&snap).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Validator));
    }
    assert_eq!(pipeline.validator_breaker().state, CircuitState::Open);

    let trace = pipeline.evaluate(&snap).await.unwrap();
    assert_eq!(trace.rejected_at(), Some(Gate::Validator));
    assert!(trace.rejection_reason().unwrap().contains("circuit open"));
    assert_eq!(validator.calls(), 2);
}

#[tokio::test]
async fn test_consecutive_losses_pause_trading() {
    let journal = Arc::new(MemoryJournal::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = AppConfig::default();
    config.signals.technical_signal = true;

    let mut pipeline = DecisionPipeline::new(&config, journal.clone())
        .with_worker(BoundedWorker::new(1, Duration::from_millis(100)))
        .with_notifier(notifier.clone() as Arc<dyn NotificationSink>);

    let entry = snapshot("BTC-USD", 100.0, 110.0, 2.0, 30.0);
    let crash = snapshot("BTC-USD", 98.5, 110.0, 2.0, 20.0);
    let start_reliability = pipeline.estimator().reliability(TECHNICAL_SIGNAL);

    for _ in 0..3 {
        let trace = pipeline
            .evaluate_with(&entry, &Enrichment::default(), noon())
            .await
            .unwrap();
        assert!(trace.is_approved(), "{:?}", trace.decision);

        let closes = pipeline.mark_to_market(&crash, noon());
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].outcome, OutcomeLabel::Loss);
    }

    assert_eq!(pipeline.risk().state().consecutive_losses, 3);
    assert!(pipeline.estimator().reliability(TECHNICAL_SIGNAL) < start_reliability);
    assert_eq!(pipeline.portfolio().losses, 3);

    let trace = pipeline
        .evaluate_with(&entry, &Enrichment::default(), noon())
        .await
        .unwrap();
    assert_eq!(trace.rejected_at(), Some(Gate::Risk));
    assert!(trace
        .rejection_reason()
        .unwrap()
        .contains("System paused (2.0h remaining"));

    // Three entries and three closes.
    assert_eq!(journal.len(), 6);
    assert_eq!(journal.stats().losses, 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let alerts = notifier.on(Channel::Alerts);
    assert!(alerts.iter().any(|m| m.contains("paused")), "{alerts:?}");
}

#[tokio::test]
async fn test_winning_sell_scored_on_trade_probability() {
    let journal = Arc::new(MemoryJournal::new());
    let mut config = AppConfig::default();
    config.signals.technical_signal = true;
    let mut pipeline = DecisionPipeline::new(&config, journal.clone());

    let entry = snapshot("ETH-USD", 120.0, 110.0, 2.0, 75.0);
    let trace = pipeline
        .evaluate_with(&entry, &Enrichment::default(), noon())
        .await
        .unwrap();
    assert!(trace.is_approved(), "{:?}", trace.decision);
    let posterior = trace.estimate.as_ref().unwrap().posterior;
    assert!(posterior < 0.5, "bearish setup, posterior {posterior}");

    let closes = pipeline.mark_to_market(&snapshot("ETH-USD", 117.0, 110.0, 2.0, 60.0), noon());
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].outcome, OutcomeLabel::Win);
    assert!((closes[0].win_probability - (1.0 - posterior)).abs() < 1e-12);

    // A correct bearish call scores (1 - (1 - p))^2 = p^2.
    let stats = journal.stats();
    assert!((stats.brier_score - posterior.powi(2)).abs() < 1e-9, "{}", stats.brier_score);
    let estimator_brier = pipeline.estimator().brier_score(100);
    assert!((estimator_brier - posterior.powi(2)).abs() < 1e-9, "{estimator_brier}");
}
