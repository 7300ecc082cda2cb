//! Replay simulation.
//!
//! Drives a generated price path through the full pipeline, tick by
//! tick, and checks that the ledger, the journal and the risk manager
//! stay consistent with each other.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use sentinel::config::AppConfig;
use sentinel::engine::enricher::Enrichment;
use sentinel::engine::pipeline::{DecisionPipeline, Gate};
use sentinel::journal::{JournalRecord, MemoryJournal};
use sentinel::types::MarketSnapshot;

use crate::mock_collaborators::snapshot;

/// Deterministic saw-tooth around 100: sharp dips that recover.
fn price_path(ticks: usize) -> Vec<f64> {
    (0..ticks)
        .map(|i| match i % 6 {
            0 => 100.0,
            1 => 96.0,
            2 => 97.5,
            3 => 99.0,
            4 => 101.0,
            _ => 103.0,
        })
        .collect()
}

fn tick(price: f64) -> MarketSnapshot {
    // Dips read oversold; rallies read neutral.
    let rsi = if price < 98.0 { 25.0 } else { 55.0 };
    snapshot("BTC-USD", price, 100.0, 1.5, rsi)
}

#[tokio::test]
async fn test_replay_keeps_books_consistent() {
    let journal = Arc::new(MemoryJournal::new());
    let mut pipeline = DecisionPipeline::new(&AppConfig::default(), journal.clone());
    let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();

    let mut approvals = 0;
    let mut closes = 0;
    for (i, price) in price_path(60).into_iter().enumerate() {
        let now = start + Duration::minutes(i as i64);
        let snap = tick(price);
        closes += pipeline.mark_to_market(&snap, now).len();
        let trace = pipeline
            .evaluate_with(&snap, &Enrichment::default(), now)
            .await
            .unwrap();
        if trace.is_approved() {
            approvals += 1;
        } else {
            let gate = trace.rejected_at().unwrap();
            assert!(
                matches!(gate, Gate::Trigger | Gate::Risk),
                "unexpected rejection at {gate}: {:?}",
                trace.rejection_reason()
            );
        }
    }

    assert!(approvals > 0);
    assert!(closes > 0);

    let portfolio = pipeline.portfolio();
    assert_eq!(portfolio.trades_opened, approvals as u64);
    assert_eq!(portfolio.trades_closed, closes as u64);
    assert_eq!(pipeline.book().len(), approvals - closes);

    let records = journal.records();
    let entries = records
        .iter()
        .filter(|r| matches!(r, JournalRecord::Entry(_)))
        .count();
    assert_eq!(entries, approvals);

    let stats = journal.stats();
    assert_eq!(stats.total_trades, closes);
    let ledger_pnl: f64 = portfolio.realized_pnl.to_string().parse().unwrap();
    assert!((stats.total_pnl - ledger_pnl).abs() < 1e-6);

    // Every close was a target hit on the rebound.
    assert_eq!(stats.losses, 0);
    assert_eq!(pipeline.risk().state().consecutive_losses, 0);
    assert!(pipeline.estimator().brier_score(100) <= 0.25);
}
