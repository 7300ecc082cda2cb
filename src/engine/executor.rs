//! Paper executor.
//!
//! Turns an approved order plan into an open paper position and closes
//! positions whose target or stop is crossed by a later snapshot. No
//! orders leave the process.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::strategy::risk::Exposure;
use crate::strategy::trigger::Trigger;
use crate::types::{HourTier, OutcomeLabel, Side};

// ---------------------------------------------------------------------------
// Order plan
// ---------------------------------------------------------------------------

/// Entry, target and stop for a triggered setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub side: Side,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_price: f64,
    /// Reward per unit of risk: |target - entry| / |entry - stop|.
    pub payout_ratio: f64,
}

impl OrderPlan {
    /// `None` when the trigger did not fire.
    pub fn from_trigger(trigger: &Trigger, entry_price: f64) -> Option<Self> {
        let side = trigger.side()?;
        let (target_price, stop_price) = match side {
            Side::Buy => (
                entry_price * (1.0 + trigger.expected_move),
                entry_price * (1.0 - trigger.risk_limit),
            ),
            Side::Sell => (
                entry_price * (1.0 - trigger.expected_move),
                entry_price * (1.0 + trigger.risk_limit),
            ),
        };
        let risk = (entry_price - stop_price).abs();
        let payout_ratio = if risk > 0.0 {
            (target_price - entry_price).abs() / risk
        } else {
            1.0
        };
        Some(Self {
            side,
            entry_price,
            target_price,
            stop_price,
            payout_ratio,
        })
    }

    /// Win probability for this side given P(price rises).
    pub fn win_probability(&self, posterior: f64) -> f64 {
        match self.side {
            Side::Buy => posterior,
            Side::Sell => 1.0 - posterior,
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub trade_id: Uuid,
    pub instrument_id: String,
    pub plan: OrderPlan,
    pub size_usd: f64,
    pub prediction_id: u64,
    pub posterior: f64,
    pub signals: BTreeMap<String, f64>,
    pub tier: HourTier,
    pub opened_at: DateTime<Utc>,
}

impl Exposure for OpenPosition {
    fn exposure_usd(&self) -> f64 {
        self.size_usd
    }
}

impl OpenPosition {
    /// Exit level crossed by `price`, if any. Stop wins when both are
    /// crossed, which can only happen with a degenerate plan.
    pub fn exit_hit(&self, price: f64) -> Option<ExitReason> {
        let p = &self.plan;
        match p.side {
            Side::Buy if price <= p.stop_price => Some(ExitReason::Stop),
            Side::Buy if price >= p.target_price => Some(ExitReason::Target),
            Side::Sell if price >= p.stop_price => Some(ExitReason::Stop),
            Side::Sell if price <= p.target_price => Some(ExitReason::Target),
            _ => None,
        }
    }

    /// Realised P&L if closed at `exit_price`.
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        if self.plan.entry_price <= 0.0 {
            return 0.0;
        }
        self.size_usd * (exit_price - self.plan.entry_price) / self.plan.entry_price
            * self.plan.side.sign()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    Target,
    Stop,
}

/// A position removed from the book with its realised result.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: OpenPosition,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl_usd: f64,
    pub outcome: OutcomeLabel,
}

/// Open paper positions.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: Vec<OpenPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[OpenPosition] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn open(&mut self, position: OpenPosition) {
        info!(
            trade_id = %position.trade_id,
            instrument = %position.instrument_id,
            side = %position.plan.side,
            entry = format!("{:.4}", position.plan.entry_price),
            target = format!("{:.4}", position.plan.target_price),
            stop = format!("{:.4}", position.plan.stop_price),
            size = format!("${:.2}", position.size_usd),
            "[PAPER] Position opened"
        );
        self.positions.push(position);
    }

    /// Remove and return every position on `instrument_id` whose target
    /// or stop is crossed by `price`. Fills at `price`.
    pub fn mark_to_market(&mut self, instrument_id: &str, price: f64) -> Vec<ClosedPosition> {
        let mut closed = Vec::new();
        let mut kept = Vec::with_capacity(self.positions.len());

        for position in self.positions.drain(..) {
            let hit = if position.instrument_id == instrument_id {
                position.exit_hit(price)
            } else {
                None
            };
            match hit {
                Some(exit_reason) => {
                    let pnl_usd = position.pnl_at(price);
                    debug!(
                        trade_id = %position.trade_id,
                        ?exit_reason,
                        pnl = format!("${:.2}", pnl_usd),
                        "Exit level crossed"
                    );
                    closed.push(ClosedPosition {
                        outcome: OutcomeLabel::from_pnl(pnl_usd),
                        position,
                        exit_price: price,
                        exit_reason,
                        pnl_usd,
                    });
                }
                None => kept.push(position),
            }
        }

        self.positions = kept;
        closed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
