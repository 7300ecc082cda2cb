//! Shared types for the SENTINEL pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that data, strategy, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::data::indicators;

// ---------------------------------------------------------------------------
// Market snapshot
// ---------------------------------------------------------------------------

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time (unix seconds). Used for ordering only.
    pub start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Normalised market state for one instrument, produced once per scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument_id: String,
    /// Last traded price.
    pub price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    /// 24-hour volume in quote currency.
    pub volume_24h: f64,
    /// 20-period simple moving average.
    pub ma_20: f64,
    /// 20-period standard deviation.
    pub std_20: f64,
    /// 14-period RSI (0–100).
    pub rsi_14: f64,
    /// Candles the statistics were derived from, if the feed supplied them.
    #[serde(default)]
    pub candles: Option<Vec<Candle>>,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] px={:.4} bid={:.4} ask={:.4} vol=${:.0} ma20={:.4} std20={:.4} rsi14={:.1}",
            self.instrument_id,
            self.price,
            self.best_bid,
            self.best_ask,
            self.volume_24h,
            self.ma_20,
            self.std_20,
            self.rsi_14,
        )
    }
}

impl MarketSnapshot {
    /// Build a snapshot from a quote plus recent candles, deriving
    /// `ma_20`, `std_20` and `rsi_14`.
    ///
    /// With no candles the statistics fall back to a flat market:
    /// `rsi = 50`, `ma = price`, `std = 1% of price`.
    pub fn from_candles(
        instrument_id: &str,
        price: f64,
        best_bid: f64,
        best_ask: f64,
        volume_24h: f64,
        candles: Vec<Candle>,
    ) -> Self {
        let (ma_20, std_20, rsi_14, candles) = if candles.is_empty() {
            (price, price * 0.01, 50.0, None)
        } else {
            (
                indicators::sma(&candles, 20),
                indicators::stddev(&candles, 20),
                indicators::rsi(&candles, 14),
                Some(candles),
            )
        };

        Self {
            instrument_id: instrument_id.to_string(),
            price,
            best_bid,
            best_ask,
            volume_24h,
            ma_20,
            std_20,
            rsi_14,
            candles,
            observed_at: Utc::now(),
        }
    }

    /// Mid price between best bid and ask, or the last price when the
    /// book is empty.
    pub fn mid_price(&self) -> f64 {
        let sum = self.best_bid + self.best_ask;
        if sum > 0.0 {
            sum / 2.0
        } else {
            self.price
        }
    }

    /// Bid/ask spread as a fraction of mid. 1.0 when there is no mid.
    pub fn spread_pct(&self) -> f64 {
        let mid = (self.best_bid + self.best_ask) / 2.0;
        if mid > 0.0 {
            (self.best_ask - self.best_bid) / mid
        } else {
            1.0
        }
    }

    /// Z-score of the last price against the 20-period mean.
    /// Zero when the standard deviation is not positive.
    pub fn z_score(&self) -> f64 {
        if self.std_20 > 0.0 {
            (self.price - self.ma_20) / self.std_20
        } else {
            0.0
        }
    }

    /// Reject snapshots with missing or malformed fields.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.instrument_id.trim().is_empty() {
            return Err(DataError::MissingField("instrument_id"));
        }

        let fields = [
            ("price", self.price),
            ("best_bid", self.best_bid),
            ("best_ask", self.best_ask),
            ("volume_24h", self.volume_24h),
            ("ma_20", self.ma_20),
            ("std_20", self.std_20),
            ("rsi_14", self.rsi_14),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(DataError::NonFinite { field: name, value });
            }
        }

        if self.price <= 0.0 {
            return Err(DataError::OutOfRange {
                field: "price",
                value: self.price,
                expected: "> 0",
            });
        }
        for (name, value) in [
            ("best_bid", self.best_bid),
            ("best_ask", self.best_ask),
            ("volume_24h", self.volume_24h),
            ("std_20", self.std_20),
        ] {
            if value < 0.0 {
                return Err(DataError::OutOfRange {
                    field: name,
                    value,
                    expected: ">= 0",
                });
            }
        }
        if !(0.0..=100.0).contains(&self.rsi_14) {
            return Err(DataError::OutOfRange {
                field: "rsi_14",
                value: self.rsi_14,
                expected: "0..=100",
            });
        }
        if self.best_ask > 0.0 && self.best_bid > self.best_ask {
            return Err(DataError::CrossedBook {
                bid: self.best_bid,
                ask: self.best_ask,
            });
        }
        Ok(())
    }

    /// Helper to build a test/sample snapshot with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        MarketSnapshot {
            instrument_id: "BTC-USD".to_string(),
            price: 100.0,
            best_bid: 99.99,
            best_ask: 100.01,
            volume_24h: 5_000_000.0,
            ma_20: 110.0,
            std_20: 2.0,
            rsi_14: 30.0,
            candles: None,
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Coarse regime label selecting which size and exposure caps apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HourTier {
    /// Favourable regime: highest caps.
    Winning,
    /// Cautious regime: tight caps.
    Learning,
    /// Adverse or unclassified: no new exposure.
    Danger,
}

impl HourTier {
    pub const ALL: &'static [HourTier] = &[HourTier::Winning, HourTier::Learning, HourTier::Danger];
}

impl fmt::Display for HourTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HourTier::Winning => write!(f, "winning"),
            HourTier::Learning => write!(f, "learning"),
            HourTier::Danger => write!(f, "danger"),
        }
    }
}

/// Attempt to parse a string into an HourTier (case-insensitive).
impl std::str::FromStr for HourTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "winning" => Ok(HourTier::Winning),
            "learning" => Ok(HourTier::Learning),
            "danger" => Ok(HourTier::Danger),
            _ => Err(anyhow::anyhow!("Unknown hour tier: {s}")),
        }
    }
}

/// Realised result of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeLabel {
    Win,
    Loss,
    /// Flat or cancelled; carries no information for learning.
    Void,
}

impl OutcomeLabel {
    /// Label a realised P&L.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            OutcomeLabel::Win
        } else if pnl < 0.0 {
            OutcomeLabel::Loss
        } else {
            OutcomeLabel::Void
        }
    }

    /// 1.0 for a win, 0.0 for a loss; `None` for void.
    pub fn as_actual(&self) -> Option<f64> {
        match self {
            OutcomeLabel::Win => Some(1.0),
            OutcomeLabel::Loss => Some(0.0),
            OutcomeLabel::Void => None,
        }
    }

    /// 1.0 when price moved up, 0.0 when down, for a trade on `side`.
    pub fn direction(&self, side: Side) -> Option<f64> {
        self.as_actual().map(|won| match side {
            Side::Buy => won,
            Side::Sell => 1.0 - won,
        })
    }
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeLabel::Win => write!(f, "win"),
            OutcomeLabel::Loss => write!(f, "loss"),
            OutcomeLabel::Void => write!(f, "void"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Probability opinions keyed by source name.
///
/// `None` means the source was consulted but has no opinion; it is
/// skipped by the estimator. Iteration order is the key order, which
/// keeps sequential Bayesian updates deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet(BTreeMap<String, Option<f64>>);

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a source's opinion.
    pub fn insert(&mut self, source: impl Into<String>, value: Option<f64>) {
        self.0.insert(source.into(), value);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, source: impl Into<String>, value: Option<f64>) -> Self {
        self.insert(source, value);
        self
    }

    pub fn get(&self, source: &str) -> Option<f64> {
        self.0.get(source).copied().flatten()
    }

    /// Sources with an opinion, in stable order.
    pub fn opinions(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.map(|v| (k.as_str(), v)))
    }

    /// Owned copy of the non-null opinions.
    pub fn used(&self) -> BTreeMap<String, f64> {
        self.opinions().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v:.2}"),
                None => format!("{k}=-"),
            })
            .collect();
        if parts.is_empty() {
            write!(f, "no signals")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Missing or malformed snapshot data. The instrument is skipped for the
/// cycle and no state is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field}={value} out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("crossed book: bid {bid} > ask {ask}")]
    CrossedBook { bid: f64, ask: f64 },

    #[error("feed error for {instrument}: {message}")]
    Feed { instrument: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
