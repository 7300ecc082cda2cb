//! Accountant: portfolio ledger and cycle reports.
//!
//! Portfolio value is carried as a `Decimal` so repeated small P&L
//! updates do not drift; strategy code reads it back as `f64`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub starting_capital: Decimal,
    pub value: Decimal,
    pub peak: Decimal,
    pub realized_pnl: Decimal,
    /// Positions ever opened; drives the bootstrap sizing cohort.
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub wins: u64,
    pub losses: u64,
}

impl Portfolio {
    pub fn new(starting_capital: f64) -> Self {
        let capital = to_decimal(starting_capital);
        Self {
            starting_capital: capital,
            value: capital,
            peak: capital,
            realized_pnl: Decimal::ZERO,
            trades_opened: 0,
            trades_closed: 0,
            wins: 0,
            losses: 0,
        }
    }

    pub fn value_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }

    pub fn record_open(&mut self) {
        self.trades_opened += 1;
    }

    /// Book a realised P&L and return the new portfolio value.
    pub fn record_close(&mut self, pnl: f64) -> f64 {
        let pnl = to_decimal(pnl);
        self.value += pnl;
        self.realized_pnl += pnl;
        self.trades_closed += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else if pnl < Decimal::ZERO {
            self.losses += 1;
        }
        if self.value > self.peak {
            self.peak = self.value;
        }
        self.value_f64()
    }

    /// Fractional decline from the all-time peak.
    pub fn drawdown_from_peak(&self) -> f64 {
        if self.peak <= Decimal::ZERO {
            return 0.0;
        }
        ((self.peak - self.value) / self.peak).to_f64().unwrap_or(0.0)
    }

    pub fn return_pct(&self) -> f64 {
        if self.starting_capital <= Decimal::ZERO {
            return 0.0;
        }
        ((self.value - self.starting_capital) / self.starting_capital)
            .to_f64()
            .unwrap_or(0.0)
    }
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one scan cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub instruments_scanned: usize,
    /// Instruments skipped for bad or missing data.
    pub skipped: usize,
    /// Instruments whose evaluation panicked.
    pub failed: usize,
    pub triggered: usize,
    pub approved: usize,
    pub closed: usize,
    /// Guarded calls that hit their deadline this cycle.
    pub timeouts: u32,
    pub portfolio_value: f64,
    pub open_positions: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn timed_out(&self) -> bool {
        self.timeouts > 0
    }
}

pub struct Accountant;

impl Accountant {
    /// Stamp the report with the ledger's closing figures and log it.
    pub fn reconcile(portfolio: &Portfolio, open_positions: usize, report: &mut CycleReport) {
        report.portfolio_value = portfolio.value_f64();
        report.open_positions = open_positions;
        report.timestamp = Some(Utc::now());

        info!(
            cycle = report.cycle_number,
            scanned = report.instruments_scanned,
            skipped = report.skipped,
            triggered = report.triggered,
            approved = report.approved,
            closed = report.closed,
            timeouts = report.timeouts,
            open = open_positions,
            portfolio = format!("${:.2}", portfolio.value),
            pnl = format!("${:.2}", portfolio.realized_pnl),
            "Cycle complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
