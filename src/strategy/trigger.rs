//! Technical trigger detection.
//!
//! Classifies a snapshot as a mean-reversion buy, a trend-exhaustion sell,
//! or nothing, from the z-score of price against its 20-period mean and
//! the 14-period RSI. Pure function of the snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::TriggerConfig;
use crate::types::{MarketSnapshot, Side};

/// What the detector saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    /// No setup; carries the statistics for diagnostics.
    NoTrigger { z_score: f64, rsi: f64 },
    /// Price far below its mean with weak momentum. Strength is |z|.
    MeanReversionBuy { strength: f64 },
    /// Price far above its mean with overbought RSI. Strength is the RSI.
    TrendExhaustionSell { strength: f64 },
}

/// Trigger classification plus the target/stop fractions used to build
/// the order plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub expected_move: f64,
    pub risk_limit: f64,
}

impl Trigger {
    pub fn is_triggered(&self) -> bool {
        !matches!(self.kind, TriggerKind::NoTrigger { .. })
    }

    /// Trade direction, if triggered.
    pub fn side(&self) -> Option<Side> {
        match self.kind {
            TriggerKind::NoTrigger { .. } => None,
            TriggerKind::MeanReversionBuy { .. } => Some(Side::Buy),
            TriggerKind::TrendExhaustionSell { .. } => Some(Side::Sell),
        }
    }

    /// Conviction of the setup; 0 when not triggered.
    pub fn strength(&self) -> f64 {
        match self.kind {
            TriggerKind::NoTrigger { .. } => 0.0,
            TriggerKind::MeanReversionBuy { strength }
            | TriggerKind::TrendExhaustionSell { strength } => strength,
        }
    }

    /// Probability opinion implied by the setup alone, for use as a
    /// `technical` signal. `None` when not triggered.
    pub fn technical_signal(&self) -> Option<f64> {
        let p = match self.kind {
            TriggerKind::NoTrigger { .. } => return None,
            TriggerKind::MeanReversionBuy { strength } => 0.7 + 0.1 * (strength - 2.0).min(1.0),
            TriggerKind::TrendExhaustionSell { strength } => {
                0.3 - 0.1 * ((strength - 70.0) / 10.0).min(1.0)
            }
        };
        Some(p.clamp(0.0, 1.0))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::NoTrigger { z_score, rsi } => {
                write!(f, "no trigger (Z={z_score:.2}, RSI={rsi:.1})")
            }
            TriggerKind::MeanReversionBuy { strength } => {
                write!(f, "MEAN_REVERSION_BUY (strength={strength:.2})")
            }
            TriggerKind::TrendExhaustionSell { strength } => {
                write!(f, "TREND_EXHAUSTION_SELL (strength={strength:.2})")
            }
        }
    }
}

pub struct TriggerDetector {
    config: TriggerConfig,
}

impl TriggerDetector {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn detect(&self, snapshot: &MarketSnapshot) -> Trigger {
        let z = snapshot.z_score();
        let rsi = snapshot.rsi_14;
        let threshold = self.config.z_threshold;

        let kind = if z < -threshold && rsi < self.config.buy_rsi_max {
            TriggerKind::MeanReversionBuy { strength: z.abs() }
        } else if z > threshold && rsi > self.config.sell_rsi_min {
            TriggerKind::TrendExhaustionSell { strength: rsi }
        } else {
            TriggerKind::NoTrigger { z_score: z, rsi }
        };

        debug!(
            instrument = %snapshot.instrument_id,
            z = format!("{z:.2}"),
            rsi = format!("{rsi:.1}"),
            triggered = !matches!(kind, TriggerKind::NoTrigger { .. }),
            "Trigger evaluated"
        );

        Trigger {
            kind,
            expected_move: self.config.expected_move,
            risk_limit: self.config.risk_limit,
        }
    }
}
