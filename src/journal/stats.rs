//! Performance statistics over closed trades.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{CloseRecord, JournalRecord};
use crate::strategy::probability::NEUTRAL_BRIER;
use crate::types::OutcomeLabel;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierStats {
    pub trades: usize,
    pub win_rate: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    /// Negative (or zero).
    pub avg_loss: f64,
    /// Gross profit over gross loss; infinite with no losses.
    pub profit_factor: f64,
    /// Annualised, `mean / std * sqrt(365)` over per-trade P&L.
    pub sharpe: f64,
    /// Largest fractional decline of the cumulative P&L curve.
    pub max_drawdown: f64,
    pub brier_score: f64,
    pub by_tier: BTreeMap<String, TierStats>,
}

impl Default for JournalStats {
    fn default() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            profit_factor: 0.0,
            sharpe: 0.0,
            max_drawdown: 0.0,
            brier_score: NEUTRAL_BRIER,
            by_tier: BTreeMap::new(),
        }
    }
}

impl JournalStats {
    pub fn from_records(records: &[JournalRecord]) -> Self {
        let closed: Vec<&CloseRecord> = records
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Close(c) => Some(c),
                JournalRecord::Entry(_) => None,
            })
            .collect();
        Self::from_closes(&closed)
    }

    pub fn from_closes(closed: &[&CloseRecord]) -> Self {
        if closed.is_empty() {
            return Self::default();
        }

        let total = closed.len();
        let pnls: Vec<f64> = closed.iter().map(|c| c.pnl_usd).collect();
        let wins: Vec<f64> = closed
            .iter()
            .filter(|c| c.outcome == OutcomeLabel::Win)
            .map(|c| c.pnl_usd)
            .collect();
        let losses: Vec<f64> = closed
            .iter()
            .filter(|c| c.outcome == OutcomeLabel::Loss)
            .map(|c| c.pnl_usd)
            .collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();

        let brier_pairs: Vec<(f64, f64)> = closed
            .iter()
            .filter_map(|c| c.outcome.as_actual().map(|a| (c.win_probability, a)))
            .collect();
        let brier_score = if brier_pairs.is_empty() {
            NEUTRAL_BRIER
        } else {
            brier_pairs.iter().map(|(p, a)| (p - a).powi(2)).sum::<f64>() / brier_pairs.len() as f64
        };

        let mut by_tier: BTreeMap<String, TierStats> = BTreeMap::new();
        for c in closed {
            let entry = by_tier.entry(c.tier.to_string()).or_default();
            entry.trades += 1;
            entry.pnl += c.pnl_usd;
            if c.outcome == OutcomeLabel::Win {
                entry.win_rate += 1.0;
            }
        }
        for tier in by_tier.values_mut() {
            tier.win_rate /= tier.trades as f64;
        }

        Self {
            total_trades: total,
            wins: wins.len(),
            losses: losses.len(),
            win_rate: wins.len() as f64 / total as f64,
            total_pnl: pnls.iter().sum(),
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            profit_factor: if gross_loss > 0.0 {
                gross_profit / gross_loss
            } else {
                f64::INFINITY
            },
            sharpe: sharpe(&pnls),
            max_drawdown: max_drawdown(&pnls),
            brier_score,
            by_tier,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sharpe(pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let m = mean(pnls);
    let var = pnls.iter().map(|p| (p - m).powi(2)).sum::<f64>() / (pnls.len() - 1) as f64;
    let std = var.sqrt();
    if std > 0.0 {
        m / std * 365f64.sqrt()
    } else {
        0.0
    }
}

fn max_drawdown(pnls: &[f64]) -> f64 {
    let mut running = 0.0;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for p in pnls {
        running += p;
        peak = peak.max(running);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - running) / peak);
        }
    }
    max_dd
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
