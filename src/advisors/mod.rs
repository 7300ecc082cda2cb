//! External advisors consulted during a scan.
//!
//! Each advisor sits behind its own circuit breaker and is only ever
//! called through the bounded worker, so an implementation may block,
//! hang, or fail without stalling the scan loop. Only the returned
//! value matters to the pipeline.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::strategy::trigger::Trigger;
use crate::types::MarketSnapshot;

/// Everything the validator is shown about a candidate trade.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationContext {
    pub snapshot: MarketSnapshot,
    pub trigger: Trigger,
    pub posterior: f64,
    pub portfolio_value: f64,
    /// Latest news summary, if one was fetched this cycle.
    pub news: Option<String>,
}

/// Validator verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved: bool,
    /// 0.0 – 1.0.
    pub confidence: f64,
    pub reason: String,
}

impl ValidationResult {
    /// Fail-closed verdict used whenever the validator could not answer.
    pub fn conservative(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// Optional confidence gate on a candidate trade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalValidator: Send + Sync {
    async fn validate(&self, context: &ValidationContext) -> Result<ValidationResult>;

    fn name(&self) -> &str;
}

/// Market-wide sentiment as a probability that prices rise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentimentSource: Send + Sync {
    /// Value in [0, 1]; 0.5 is neutral.
    async fn classify(&self) -> Result<f64>;

    fn name(&self) -> &str;
}

/// Short free-text market news digest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn summarize(&self) -> Result<String>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
