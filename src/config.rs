//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has explicit defaults, so a partial file (or none of a
//! section at all) is valid. `AppConfig::validate` runs at load time.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use crate::types::HourTier;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub scan: ScanConfig,
    pub trigger: TriggerConfig,
    pub signals: SignalConfig,
    pub edge: EdgeConfig,
    pub validator: ValidatorConfig,
    pub sizing: SizingConfig,
    pub tiers: TierSchedule,
    pub risk: RiskConfig,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub starting_capital: f64,
    pub instruments: Vec<String>,
    /// JSON snapshot feed read by the binary.
    pub feed_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "SENTINEL-001".to_string(),
            starting_capital: 1000.0,
            instruments: [
                "BTC-USD", "ETH-USD", "SOL-USD", "XRP-USD", "ADA-USD", "AVAX-USD", "LINK-USD",
                "DOT-USD", "DOGE-USD",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            feed_path: "snapshots.json".to_string(),
        }
    }
}

/// Scan loop timing.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Target cycle length.
    pub interval_secs: u64,
    /// Hard deadline for any guarded external call. Must be shorter than
    /// the scan interval.
    pub call_timeout_ms: u64,
    /// Floor on the sleep between cycles.
    pub min_sleep_secs: u64,
    /// Added to the sleep per consecutive timed-out cycle.
    pub timeout_backoff_step_secs: u64,
    /// Cap on the additive timeout backoff.
    pub timeout_backoff_cap_secs: u64,
    /// Sleep after an outer-loop failure.
    pub error_retry_secs: u64,
    /// Sleep granularity; bounds shutdown latency.
    pub shutdown_poll_ms: u64,
    /// Concurrent in-flight guarded calls (abandoned calls hold a slot
    /// until they finish).
    pub worker_slots: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            call_timeout_ms: 6_000,
            min_sleep_secs: 5,
            timeout_backoff_step_secs: 5,
            timeout_backoff_cap_secs: 30,
            error_retry_secs: 10,
            shutdown_poll_ms: 500,
            worker_slots: 4,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Technical trigger thresholds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TriggerConfig {
    /// |z| beyond which a deviation is considered extreme.
    pub z_threshold: f64,
    /// RSI must be below this for a mean-reversion buy.
    pub buy_rsi_max: f64,
    /// RSI must be above this for a trend-exhaustion sell.
    pub sell_rsi_min: f64,
    /// Target distance as a fraction of entry.
    pub expected_move: f64,
    /// Stop distance as a fraction of entry.
    pub risk_limit: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.0,
            buy_rsi_max: 35.0,
            sell_rsi_min: 65.0,
            expected_move: 0.02,
            risk_limit: 0.01,
        }
    }
}

/// Bayesian estimator settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SignalConfig {
    /// Market-implied prior used by the pipeline (spot has no implied
    /// probability, so this defaults to neutral).
    pub prior_probability: f64,
    /// EMA decay for reliability learning.
    pub ema_alpha: f64,
    /// Starting reliability per source. Unknown sources start at 0.5.
    pub initial_reliability: BTreeMap<String, f64>,
    /// Inject a `technical` signal derived from the trigger.
    pub technical_signal: bool,
    /// Prediction records kept for Brier scoring.
    pub history_cap: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        let mut initial_reliability = BTreeMap::new();
        initial_reliability.insert("technical".to_string(), 0.6);
        initial_reliability.insert("sentiment".to_string(), 0.5);
        Self {
            prior_probability: 0.5,
            ema_alpha: 0.05,
            initial_reliability,
            technical_signal: false,
            history_cap: 10_000,
        }
    }
}

/// Liquidity and edge gate thresholds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EdgeConfig {
    pub min_liquidity_score: f64,
    pub max_spread_pct: f64,
    /// Assumed standard deviation of signal-implied probabilities.
    pub signal_std: f64,
    /// Information-ratio floor.
    pub min_info_ratio: f64,
    /// Trigger strength that passes the edge gate on its own.
    pub high_conviction_strength: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_liquidity_score: 5.0,
            max_spread_pct: 0.001,
            signal_std: 0.1,
            min_info_ratio: 0.5,
            high_conviction_strength: 2.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValidatorConfig {
    /// When false (or no validator is wired) the gate passes through.
    pub enabled: bool,
    pub min_confidence: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.7,
        }
    }
}

/// Position sizing.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
    /// Trades numbered below this use the bootstrap cap.
    pub bootstrap_trades: u64,
    pub bootstrap_cap: f64,
    pub winning_cap: f64,
    pub learning_cap: f64,
    /// Smallest order worth placing, in currency units.
    pub min_notional: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            bootstrap_trades: 50,
            bootstrap_cap: 0.02,
            winning_cap: 0.10,
            learning_cap: 0.03,
            min_notional: 1.0,
        }
    }
}

impl SizingConfig {
    /// Per-trade cap for a tier once past the bootstrap cohort.
    pub fn tier_cap(&self, tier: HourTier) -> f64 {
        match tier {
            HourTier::Winning => self.winning_cap,
            HourTier::Learning => self.learning_cap,
            HourTier::Danger => 0.0,
        }
    }
}

/// UTC hour → tier mapping. Hours in neither list are Learning.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TierSchedule {
    pub winning_hours: Vec<u32>,
    pub danger_hours: Vec<u32>,
}

impl TierSchedule {
    pub fn tier_for_hour(&self, hour: u32) -> HourTier {
        if self.danger_hours.contains(&hour) {
            HourTier::Danger
        } else if self.winning_hours.contains(&hour) {
            HourTier::Winning
        } else {
            HourTier::Learning
        }
    }
}

/// Longest admissible trailing drawdown window.
pub const MAX_DRAWDOWN_WINDOW_DAYS: i64 = 365;

/// Risk limits and circuit-breaker style pauses.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub max_daily_loss_pct: f64,
    pub max_weekly_loss_pct: f64,
    /// Drawdown beyond this rejects everything.
    pub max_drawdown_stop_pct: f64,
    /// Drawdown beyond this restricts approval to the Learning tier.
    pub max_drawdown_warning_pct: f64,
    /// Drawdown beyond this queues an informational alert.
    pub max_drawdown_alert_pct: f64,
    /// Consecutive losses that trigger the first pause.
    pub consecutive_loss_pause_base: u32,
    pub winning_heat_cap: f64,
    pub learning_heat_cap: f64,
    /// Trailing window for the drawdown peak.
    pub drawdown_window_days: i64,
    /// Hard cap on retained portfolio samples.
    pub history_cap: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.05,
            max_weekly_loss_pct: 0.10,
            max_drawdown_stop_pct: 0.20,
            max_drawdown_warning_pct: 0.10,
            max_drawdown_alert_pct: 0.05,
            consecutive_loss_pause_base: 3,
            winning_heat_cap: 0.25,
            learning_heat_cap: 0.10,
            drawdown_window_days: 7,
            history_cap: 5_000,
        }
    }
}

impl RiskConfig {
    /// Maximum total exposure for a tier, as a fraction of portfolio.
    pub fn heat_cap(&self, tier: HourTier) -> f64 {
        match tier {
            HourTier::Winning => self.winning_heat_cap,
            HourTier::Learning => self.learning_heat_cap,
            HourTier::Danger => 0.0,
        }
    }
}

/// Circuit breaker settings shared by every guarded dependency.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            recovery_secs: 300,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_secs)
    }
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} = {value} must be within {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("call timeout ({call_ms} ms) must be shorter than the scan interval ({interval_secs} s)")]
    DeadlineTooLong { call_ms: u64, interval_secs: u64 },

    #[error("{0}")]
    Invalid(String),
}

fn check_range(
    field: &'static str,
    value: f64,
    lo: f64,
    hi: f64,
    range: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, range })
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every tunable against its admissible range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.starting_capital <= 0.0 || !self.agent.starting_capital.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "agent.starting_capital",
                value: self.agent.starting_capital,
                range: "(0, inf)",
            });
        }
        if self.agent.instruments.is_empty() {
            return Err(ConfigError::Invalid("agent.instruments is empty".into()));
        }

        if self.scan.interval_secs == 0 {
            return Err(ConfigError::Invalid("scan.interval_secs must be > 0".into()));
        }
        if self.scan.call_timeout_ms == 0
            || self.scan.call_timeout_ms >= self.scan.interval_secs.saturating_mul(1000)
        {
            return Err(ConfigError::DeadlineTooLong {
                call_ms: self.scan.call_timeout_ms,
                interval_secs: self.scan.interval_secs,
            });
        }
        if self.scan.worker_slots == 0 {
            return Err(ConfigError::Invalid("scan.worker_slots must be > 0".into()));
        }
        if self.scan.shutdown_poll_ms == 0 {
            return Err(ConfigError::Invalid("scan.shutdown_poll_ms must be > 0".into()));
        }

        let t = &self.trigger;
        check_range("trigger.z_threshold", t.z_threshold, 0.0, f64::MAX, "[0, inf)")?;
        check_range("trigger.buy_rsi_max", t.buy_rsi_max, 0.0, 100.0, "[0, 100]")?;
        check_range("trigger.sell_rsi_min", t.sell_rsi_min, 0.0, 100.0, "[0, 100]")?;
        check_range("trigger.expected_move", t.expected_move, 0.0, 1.0, "[0, 1]")?;
        check_range("trigger.risk_limit", t.risk_limit, 0.0, 1.0, "[0, 1]")?;

        let s = &self.signals;
        check_range("signals.prior_probability", s.prior_probability, 0.0, 1.0, "[0, 1]")?;
        check_range("signals.ema_alpha", s.ema_alpha, 0.0, 1.0, "[0, 1]")?;
        for value in s.initial_reliability.values() {
            check_range("signals.initial_reliability", *value, 0.0, 1.0, "[0, 1]")?;
        }
        if s.history_cap == 0 {
            return Err(ConfigError::Invalid("signals.history_cap must be > 0".into()));
        }

        let e = &self.edge;
        check_range("edge.max_spread_pct", e.max_spread_pct, 0.0, 1.0, "[0, 1]")?;
        if e.signal_std <= 0.0 || !e.signal_std.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "edge.signal_std",
                value: e.signal_std,
                range: "(0, inf)",
            });
        }

        check_range(
            "validator.min_confidence",
            self.validator.min_confidence,
            0.0,
            1.0,
            "[0, 1]",
        )?;

        let z = &self.sizing;
        check_range("sizing.kelly_fraction", z.kelly_fraction, 0.0, 1.0, "[0, 1]")?;
        check_range("sizing.bootstrap_cap", z.bootstrap_cap, 0.0, 1.0, "[0, 1]")?;
        check_range("sizing.learning_cap", z.learning_cap, 0.0, 1.0, "[0, 1]")?;
        check_range(
            "sizing.winning_cap",
            z.winning_cap,
            z.learning_cap,
            1.0,
            "[learning_cap, 1]",
        )?;
        check_range("sizing.min_notional", z.min_notional, 0.0, f64::MAX, "[0, inf)")?;

        for hour in self.tiers.winning_hours.iter().chain(&self.tiers.danger_hours) {
            if *hour > 23 {
                return Err(ConfigError::Invalid(format!("tier hour {hour} is not 0..=23")));
            }
        }

        let r = &self.risk;
        check_range("risk.max_daily_loss_pct", r.max_daily_loss_pct, 0.0, 1.0, "[0, 1]")?;
        check_range("risk.max_weekly_loss_pct", r.max_weekly_loss_pct, 0.0, 1.0, "[0, 1]")?;
        check_range("risk.max_drawdown_stop_pct", r.max_drawdown_stop_pct, 0.0, 1.0, "[0, 1]")?;
        check_range(
            "risk.max_drawdown_warning_pct",
            r.max_drawdown_warning_pct,
            0.0,
            r.max_drawdown_stop_pct,
            "[0, max_drawdown_stop_pct]",
        )?;
        check_range(
            "risk.max_drawdown_alert_pct",
            r.max_drawdown_alert_pct,
            0.0,
            1.0,
            "[0, 1]",
        )?;
        check_range("risk.learning_heat_cap", r.learning_heat_cap, 0.0, 1.0, "[0, 1]")?;
        check_range(
            "risk.winning_heat_cap",
            r.winning_heat_cap,
            r.learning_heat_cap,
            1.0,
            "[learning_heat_cap, 1]",
        )?;
        if r.consecutive_loss_pause_base == 0 {
            return Err(ConfigError::Invalid(
                "risk.consecutive_loss_pause_base must be > 0".into(),
            ));
        }
        if !(1..=MAX_DRAWDOWN_WINDOW_DAYS).contains(&r.drawdown_window_days) {
            return Err(ConfigError::Invalid(format!(
                "risk.drawdown_window_days = {} must be within 1..={MAX_DRAWDOWN_WINDOW_DAYS}",
                r.drawdown_window_days
            )));
        }
        if r.history_cap == 0 {
            return Err(ConfigError::Invalid("risk.history_cap must be > 0".into()));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be > 0".into(),
            ));
        }

        Ok(())
    }
}
