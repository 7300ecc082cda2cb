//! Strategy layer: trigger detection, probability estimation, edge,
//! Kelly sizing, and risk management.
//!
//! Everything here is synchronous and owns its own state; the engine
//! drives it one snapshot at a time.

pub mod edge;
pub mod kelly;
pub mod probability;
pub mod risk;
pub mod trigger;

pub use edge::{EdgeDetector, EdgeReport, LiquidityReport, LiquidityVerdict};
pub use kelly::{PositionSizer, SizingResult};
pub use probability::{Estimate, ProbabilityEstimator, TradeResolution};
pub use risk::{RejectionReason, RiskAlert, RiskCheck, RiskManager, RiskState, RiskStatus};
pub use trigger::{Trigger, TriggerDetector, TriggerKind};
