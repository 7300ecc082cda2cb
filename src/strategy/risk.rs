//! Risk manager: pre-trade eligibility and post-trade bookkeeping.
//!
//! `check_trade` runs a fixed sequence of checks and stops at the first
//! failure: pause window, daily loss, weekly loss, drawdown stop,
//! drawdown warning, portfolio heat. `record_trade_result` updates the
//! P&L counters, the portfolio history used for drawdown, and the
//! consecutive-loss pause.
//!
//! Daily and weekly counters reset when the UTC calendar label changes.
//! Labels live in [`RiskState`], which is serializable so a caller can
//! persist it; if it is not persisted, a restart starts from "never
//! reset" and the first check after it clears both counters.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::types::HourTier;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Portfolio value observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    ConsecutiveLossPause,
    CriticalDrawdown,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::ConsecutiveLossPause => write!(f, "CONSECUTIVE_LOSS_PAUSE"),
            AlertKind::CriticalDrawdown => write!(f, "CRITICAL_DRAWDOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the risk manager mutates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub consecutive_losses: u32,
    pub pause_until: Option<DateTime<Utc>>,
    pub history: VecDeque<PortfolioSample>,
    pub pending_alerts: Vec<RiskAlert>,
    /// `%Y-%m-%d` of the last daily reset.
    pub day_label: Option<String>,
    /// ISO `YYYY-Www` of the last weekly reset.
    pub week_label: Option<String>,
}

// ---------------------------------------------------------------------------
// Check results
// ---------------------------------------------------------------------------

/// Why a trade was refused. Not an error: a normal rejected outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionReason {
    Paused { remaining_hours: f64 },
    DailyLossLimit { lost: f64, max: f64 },
    WeeklyLossLimit { lost: f64, max: f64 },
    DrawdownStop { drawdown: f64, max: f64 },
    DrawdownWarning { drawdown: f64, tier: HourTier },
    PortfolioHeat { exposure: f64, cap: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Paused { remaining_hours } => write!(
                f,
                "System paused ({remaining_hours:.1}h remaining after consecutive losses)"
            ),
            RejectionReason::DailyLossLimit { lost, max } => {
                write!(f, "Daily loss limit: already lost ${lost:.2}, max ${max:.2}")
            }
            RejectionReason::WeeklyLossLimit { lost, max } => {
                write!(f, "Weekly loss limit: already lost ${lost:.2}, max ${max:.2}")
            }
            RejectionReason::DrawdownStop { drawdown, max } => write!(
                f,
                "Drawdown {:.1}% > {:.0}%, stopped",
                drawdown * 100.0,
                max * 100.0
            ),
            RejectionReason::DrawdownWarning { drawdown, tier } => write!(
                f,
                "Drawdown {:.1}%: only learning-tier trades allowed (got {tier})",
                drawdown * 100.0
            ),
            RejectionReason::PortfolioHeat { exposure, cap } => write!(
                f,
                "Total exposure {:.0}% would exceed {:.0}%",
                exposure * 100.0,
                cap * 100.0
            ),
        }
    }
}

/// Outcome of a pre-trade check, with the metrics it was based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub approved: bool,
    pub reason: Option<RejectionReason>,
    pub daily_pnl: f64,
    pub drawdown: f64,
    /// Projected exposure including the candidate; 0 if not reached.
    pub exposure: f64,
    pub consecutive_losses: u32,
}

/// Point-in-time summary for dashboards and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub consecutive_losses: u32,
    pub paused: bool,
    pub pause_remaining_hours: f64,
    pub drawdown: f64,
}

/// Anything that contributes notional to portfolio heat.
pub trait Exposure {
    fn exposure_usd(&self) -> f64;
}

impl Exposure for f64 {
    fn exposure_usd(&self) -> f64 {
        *self
    }
}

// ---------------------------------------------------------------------------
// Risk manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self::with_state(config, RiskState::default())
    }

    /// Resume from previously exported state.
    pub fn with_state(config: RiskConfig, state: RiskState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn check_trade<P: Exposure>(
        &mut self,
        size: f64,
        portfolio_value: f64,
        open_positions: &[P],
        tier: HourTier,
    ) -> RiskCheck {
        self.check_trade_at(size, portfolio_value, open_positions, tier, Utc::now())
    }

    pub fn check_trade_at<P: Exposure>(
        &mut self,
        size: f64,
        portfolio_value: f64,
        open_positions: &[P],
        tier: HourTier,
        now: DateTime<Utc>,
    ) -> RiskCheck {
        self.maybe_reset(now);

        let mut check = RiskCheck {
            approved: false,
            reason: None,
            daily_pnl: self.state.daily_pnl,
            drawdown: 0.0,
            exposure: 0.0,
            consecutive_losses: self.state.consecutive_losses,
        };

        if let Some(remaining_hours) = self.pause_remaining_hours(now) {
            check.reason = Some(RejectionReason::Paused { remaining_hours });
            return self.rejected(check);
        }

        // Worst case: the whole candidate position is lost.
        let max_daily = portfolio_value * self.config.max_daily_loss_pct;
        if self.state.daily_pnl < 0.0 && self.state.daily_pnl.abs() + size > max_daily {
            check.reason = Some(RejectionReason::DailyLossLimit {
                lost: self.state.daily_pnl.abs(),
                max: max_daily,
            });
            return self.rejected(check);
        }

        let max_weekly = portfolio_value * self.config.max_weekly_loss_pct;
        if self.state.weekly_pnl < 0.0 && self.state.weekly_pnl.abs() + size > max_weekly {
            check.reason = Some(RejectionReason::WeeklyLossLimit {
                lost: self.state.weekly_pnl.abs(),
                max: max_weekly,
            });
            return self.rejected(check);
        }

        let drawdown = self.drawdown_at(portfolio_value, now);
        check.drawdown = drawdown;
        if drawdown > self.config.max_drawdown_stop_pct {
            check.reason = Some(RejectionReason::DrawdownStop {
                drawdown,
                max: self.config.max_drawdown_stop_pct,
            });
            return self.rejected(check);
        }
        if drawdown > self.config.max_drawdown_warning_pct && tier != HourTier::Learning {
            check.reason = Some(RejectionReason::DrawdownWarning { drawdown, tier });
            return self.rejected(check);
        }

        let current: f64 = open_positions.iter().map(|p| p.exposure_usd().abs()).sum();
        let exposure = if portfolio_value > 0.0 {
            (current + size) / portfolio_value
        } else {
            1.0
        };
        check.exposure = exposure;
        let cap = self.config.heat_cap(tier);
        if exposure > cap {
            check.reason = Some(RejectionReason::PortfolioHeat { exposure, cap });
            return self.rejected(check);
        }

        check.approved = true;
        check
    }

    fn rejected(&self, check: RiskCheck) -> RiskCheck {
        if let Some(reason) = &check.reason {
            debug!(%reason, "Risk check rejected");
        }
        check
    }

    pub fn record_trade_result(&mut self, pnl: f64, portfolio_value: f64) {
        self.record_trade_result_at(pnl, portfolio_value, Utc::now());
    }

    pub fn record_trade_result_at(&mut self, pnl: f64, portfolio_value: f64, now: DateTime<Utc>) {
        self.maybe_reset(now);

        self.state.daily_pnl += pnl;
        self.state.weekly_pnl += pnl;
        self.push_sample(PortfolioSample {
            timestamp: now,
            value: portfolio_value,
        });

        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
            self.maybe_pause(now);
        } else {
            self.state.consecutive_losses = 0;
        }

        let drawdown = self.drawdown_at(portfolio_value, now);
        if drawdown > self.config.max_drawdown_alert_pct {
            let message = format!(
                "Drawdown {:.1}% exceeds {:.0}% alert threshold",
                drawdown * 100.0,
                self.config.max_drawdown_alert_pct * 100.0
            );
            warn!(drawdown = format!("{:.2}%", drawdown * 100.0), "{message}");
            self.state.pending_alerts.push(RiskAlert {
                kind: AlertKind::CriticalDrawdown,
                message,
                timestamp: now,
            });
        }

        info!(
            pnl = format!("${:.2}", pnl),
            daily = format!("${:.2}", self.state.daily_pnl),
            weekly = format!("${:.2}", self.state.weekly_pnl),
            losses = self.state.consecutive_losses,
            "Trade result recorded"
        );
    }

    /// Pending alerts, oldest first. Clears the queue.
    pub fn drain_alerts(&mut self) -> Vec<RiskAlert> {
        std::mem::take(&mut self.state.pending_alerts)
    }

    pub fn status(&self, now: DateTime<Utc>) -> RiskStatus {
        let remaining = self.pause_remaining_hours(now);
        let current = self.state.history.back().map(|s| s.value).unwrap_or(0.0);
        RiskStatus {
            daily_pnl: self.state.daily_pnl,
            weekly_pnl: self.state.weekly_pnl,
            consecutive_losses: self.state.consecutive_losses,
            paused: remaining.is_some(),
            pause_remaining_hours: remaining.unwrap_or(0.0),
            drawdown: self.drawdown_at(current, now),
        }
    }

    /// Drawdown of `current` from the peak of the trailing window,
    /// the current value included. Zero with no history.
    pub fn drawdown_at(&self, current: f64, now: DateTime<Utc>) -> f64 {
        if self.state.history.is_empty() {
            return 0.0;
        }
        let cutoff = now - Duration::days(self.config.drawdown_window_days);
        let peak = self
            .state
            .history
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .map(|s| s.value)
            .fold(current, f64::max);
        if peak > 0.0 {
            (peak - current) / peak
        } else {
            0.0
        }
    }

    fn pause_remaining_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        match self.state.pause_until {
            Some(until) if now < until => {
                Some((until - now).num_seconds() as f64 / 3600.0)
            }
            _ => None,
        }
    }

    /// Exponential backoff: `2^(losses - base + 1)` hours.
    fn maybe_pause(&mut self, now: DateTime<Utc>) {
        let base = self.config.consecutive_loss_pause_base;
        let losses = self.state.consecutive_losses;
        if losses < base {
            return;
        }
        let hours = pause_hours(losses, base);
        let until = now
            .checked_add_signed(Duration::hours(hours))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state.pause_until = Some(until);

        let message = format!("{losses} consecutive losses, paused for {hours}h");
        warn!(losses, hours, "Consecutive-loss pause engaged");
        self.state.pending_alerts.push(RiskAlert {
            kind: AlertKind::ConsecutiveLossPause,
            message,
            timestamp: now,
        });
    }

    fn push_sample(&mut self, sample: PortfolioSample) {
        let cutoff = sample.timestamp - Duration::days(self.config.drawdown_window_days);
        self.state.history.push_back(sample);
        while self
            .state
            .history
            .front()
            .is_some_and(|s| s.timestamp <= cutoff)
        {
            self.state.history.pop_front();
        }
        while self.state.history.len() > self.config.history_cap {
            self.state.history.pop_front();
        }
    }

    fn maybe_reset(&mut self, now: DateTime<Utc>) {
        let day = now.format("%Y-%m-%d").to_string();
        if self.state.day_label.as_deref() != Some(day.as_str()) {
            if self.state.day_label.is_some() {
                debug!(day = %day, "Daily risk counters reset");
            }
            self.state.daily_pnl = 0.0;
            self.state.day_label = Some(day);
        }

        let iso = now.iso_week();
        let week = format!("{}-W{:02}", iso.year(), iso.week());
        if self.state.week_label.as_deref() != Some(week.as_str()) {
            if self.state.week_label.is_some() {
                debug!(week = %week, "Weekly risk counters reset");
            }
            self.state.weekly_pnl = 0.0;
            self.state.week_label = Some(week);
        }
    }
}

/// Longest pause a loss streak can impose: one year.
pub const MAX_PAUSE_HOURS: i64 = 24 * 365;

/// Pause length in hours once `losses >= base`, capped at [`MAX_PAUSE_HOURS`].
pub fn pause_hours(losses: u32, base: u32) -> i64 {
    let exponent = losses.saturating_sub(base).saturating_add(1).min(32);
    (1i64 << exponent).min(MAX_PAUSE_HOURS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
