//! Kelly criterion position sizing.
//!
//! Fractional Kelly with a volatility dampener and cohort/tier caps.
//! Every intermediate value is returned so the decision trace can show
//! how a size was reached.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SizingConfig;
use crate::types::HourTier;

/// Reason reported when the Kelly fraction is not positive.
pub const NO_EDGE: &str = "no edge";

// ---------------------------------------------------------------------------
// Sizing result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// Proposed notional in currency units, rounded to cents.
    pub size_usd: f64,
    /// Proposed size as a fraction of portfolio value.
    pub size_pct: f64,
    pub full_kelly: f64,
    pub fractional_kelly: f64,
    /// Fractional Kelly after the volatility dampener.
    pub vol_adjusted: f64,
    pub vol_adjustment: f64,
    /// Cap that applied (bootstrap or tier).
    pub cap: f64,
    pub tier: HourTier,
    /// True while the trade falls in the bootstrap cohort.
    pub bootstrap: bool,
    /// Why the size is zero, if it is.
    pub reason: Option<String>,
}

impl SizingResult {
    fn zero(tier: HourTier, full_kelly: f64, reason: &str) -> Self {
        Self {
            size_usd: 0.0,
            size_pct: 0.0,
            full_kelly,
            fractional_kelly: 0.0,
            vol_adjusted: 0.0,
            vol_adjustment: 1.0,
            cap: 0.0,
            tier,
            bootstrap: false,
            reason: Some(reason.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Position sizer
// ---------------------------------------------------------------------------

pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Access the sizing configuration.
    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Dampener applied to the fractional Kelly for elevated volatility.
    pub fn volatility_adjustment(volatility_ratio: f64) -> f64 {
        if volatility_ratio > 2.0 {
            0.5
        } else if volatility_ratio > 1.5 {
            0.75
        } else {
            1.0
        }
    }

    /// Size a trade.
    ///
    /// Kelly formula: f* = (p*b - q) / b
    /// where:
    ///   p = win probability, clipped to [0.01, 0.99]
    ///   q = 1 - p
    ///   b = payout ratio, floored at 0.01
    pub fn calculate(
        &self,
        p: f64,
        payout_ratio: f64,
        tier: HourTier,
        portfolio_value: f64,
        trade_count: u64,
        volatility_ratio: f64,
    ) -> SizingResult {
        let p = p.clamp(0.01, 0.99);
        let q = 1.0 - p;
        let b = payout_ratio.max(0.01);

        let full_kelly = (p * b - q) / b;
        if full_kelly <= 0.0 {
            debug!(p, b, full_kelly, "Non-positive Kelly, no size");
            return SizingResult::zero(tier, full_kelly, NO_EDGE);
        }

        let fractional_kelly = full_kelly * self.config.kelly_fraction;
        let vol_adjustment = Self::volatility_adjustment(volatility_ratio);
        let vol_adjusted = fractional_kelly * vol_adjustment;

        let bootstrap = trade_count < self.config.bootstrap_trades;
        let cap = if bootstrap {
            self.config.bootstrap_cap
        } else {
            self.config.tier_cap(tier)
        };

        let size_pct = vol_adjusted.min(cap).max(0.0);
        let size_usd = round_cents(size_pct * portfolio_value.max(0.0));

        let reason = if size_usd <= 0.0 {
            Some(format!("zero cap for {tier} tier"))
        } else {
            None
        };

        debug!(
            full_kelly = format!("{:.2}%", full_kelly * 100.0),
            adjusted = format!("{:.2}%", vol_adjusted * 100.0),
            cap = format!("{:.2}%", cap * 100.0),
            size = format!("${:.2}", size_usd),
            %tier,
            bootstrap,
            "Position sized"
        );

        SizingResult {
            size_usd,
            size_pct,
            full_kelly,
            fractional_kelly,
            vol_adjusted,
            vol_adjustment,
            cap,
            tier,
            bootstrap,
            reason,
        }
    }
}

/// Round a currency amount to cents.
fn round_cents(amount: f64) -> f64 {
    Decimal::from_f64(amount)
        .map(|d| d.round_dp(2))
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
