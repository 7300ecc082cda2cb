//! Liquidity and edge gates.
//!
//! Liquidity scores a snapshot from volume and spread. The edge check
//! approves on either signal-based conviction (information ratio) or
//! purely technical conviction (trigger strength). Both are pure.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EdgeConfig;
use crate::strategy::trigger::Trigger;
use crate::types::MarketSnapshot;

// ---------------------------------------------------------------------------
// Liquidity
// ---------------------------------------------------------------------------

/// Microstructure summary for the liquidity gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityReport {
    /// `log10(volume) * (1 - spread_pct * 100)`.
    pub score: f64,
    pub spread_pct: f64,
    pub volume_24h: f64,
    pub mid_price: f64,
}

/// Why the liquidity gate failed.
#[derive(Debug, Clone, PartialEq)]
pub enum LiquidityVerdict {
    Ok,
    LowScore { score: f64, min: f64 },
    WideSpread { spread_pct: f64, max: f64 },
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Outcome of the edge check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeReport {
    pub has_edge: bool,
    pub info_ratio: f64,
    pub trigger_strength: f64,
    /// Which condition carried the approval, or why none did.
    pub reason: String,
}

pub struct EdgeDetector {
    config: EdgeConfig,
}

impl EdgeDetector {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    /// Access the edge configuration.
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn liquidity(&self, snapshot: &MarketSnapshot) -> LiquidityReport {
        let spread_pct = snapshot.spread_pct();
        let volume = snapshot.volume_24h;
        let score = volume.max(1.0).log10() * (1.0 - spread_pct * 100.0);

        LiquidityReport {
            score,
            spread_pct,
            volume_24h: volume,
            mid_price: snapshot.mid_price(),
        }
    }

    pub fn judge_liquidity(&self, report: &LiquidityReport) -> LiquidityVerdict {
        if report.score < self.config.min_liquidity_score {
            return LiquidityVerdict::LowScore {
                score: report.score,
                min: self.config.min_liquidity_score,
            };
        }
        if report.spread_pct > self.config.max_spread_pct {
            return LiquidityVerdict::WideSpread {
                spread_pct: report.spread_pct,
                max: self.config.max_spread_pct,
            };
        }
        LiquidityVerdict::Ok
    }

    /// Information ratio of the posterior against a coin flip.
    pub fn info_ratio(&self, posterior: f64) -> f64 {
        (posterior - 0.5) / self.config.signal_std
    }

    /// Approve when the information ratio clears its floor OR the trigger
    /// alone is strong enough.
    pub fn check(&self, posterior: f64, trigger: &Trigger) -> EdgeReport {
        let info_ratio = self.info_ratio(posterior);
        let strength = trigger.strength();
        let by_signal = info_ratio > self.config.min_info_ratio;
        let by_trigger = strength > self.config.high_conviction_strength;

        let reason = match (by_signal, by_trigger) {
            (true, true) => "info ratio and trigger strength".to_string(),
            (true, false) => format!("info ratio {info_ratio:.2} > {:.2}", self.config.min_info_ratio),
            (false, true) => format!(
                "trigger strength {strength:.2} > {:.2}",
                self.config.high_conviction_strength
            ),
            (false, false) => format!(
                "low info ratio {info_ratio:.2} <= {:.2} and strength {strength:.2} <= {:.2}",
                self.config.min_info_ratio, self.config.high_conviction_strength
            ),
        };

        debug!(
            info_ratio = format!("{info_ratio:.2}"),
            strength = format!("{strength:.2}"),
            has_edge = by_signal || by_trigger,
            "Edge checked"
        );

        EdgeReport {
            has_edge: by_signal || by_trigger,
            info_ratio,
            trigger_strength: strength,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
