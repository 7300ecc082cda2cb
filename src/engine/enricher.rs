//! Per-cycle signal enrichment.
//!
//! Calls the sentiment and news advisors once per cycle, each through
//! its own circuit breaker on the bounded worker. Sentiment falls back
//! to neutral and news to a short status string, so a dead advisor
//! never stops a cycle.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::advisors::{NewsSource, SentimentSource};
use crate::config::BreakerConfig;
use crate::resilience::{BoundedWorker, BreakerStatus, CallOutcome, CircuitBreaker};
use crate::types::SignalSet;

/// Signal name under which sentiment enters the estimator.
pub const SENTIMENT_SIGNAL: &str = "sentiment";

/// Neutral sentiment used when the advisor cannot answer.
pub const NEUTRAL_SENTIMENT: f64 = 0.5;

/// What the enricher gathered for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub signals: SignalSet,
    pub news: Option<String>,
    /// Guarded calls that hit their deadline.
    pub timeouts: u32,
}

pub struct Enricher {
    sentiment: Option<Arc<dyn SentimentSource>>,
    news: Option<Arc<dyn NewsSource>>,
    sentiment_breaker: CircuitBreaker,
    news_breaker: CircuitBreaker,
    worker: BoundedWorker,
}

impl Enricher {
    pub fn new(worker: BoundedWorker, breaker: &BreakerConfig) -> Self {
        Self {
            sentiment: None,
            news: None,
            sentiment_breaker: CircuitBreaker::new("sentiment", breaker),
            news_breaker: CircuitBreaker::new("news", breaker),
            worker,
        }
    }

    pub fn with_sentiment(mut self, source: Arc<dyn SentimentSource>) -> Self {
        self.sentiment = Some(source);
        self
    }

    pub fn with_news(mut self, source: Arc<dyn NewsSource>) -> Self {
        self.news = Some(source);
        self
    }

    pub fn breakers(&self) -> [BreakerStatus; 2] {
        [self.sentiment_breaker.status(), self.news_breaker.status()]
    }

    pub async fn gather(&self) -> Enrichment {
        let mut enrichment = Enrichment::default();

        if let Some(source) = &self.sentiment {
            let source = Arc::clone(source);
            let outcome = self
                .worker
                .call(&self.sentiment_breaker, async move { source.classify().await })
                .await;
            if outcome.is_timeout() {
                enrichment.timeouts += 1;
            }
            let value = match outcome {
                CallOutcome::Ok(v) if v.is_finite() => v.clamp(0.0, 1.0),
                other => {
                    warn!(outcome = %other, "Sentiment unavailable, using neutral");
                    NEUTRAL_SENTIMENT
                }
            };
            enrichment.signals.insert(SENTIMENT_SIGNAL, Some(value));
        }

        if let Some(source) = &self.news {
            let source = Arc::clone(source);
            let outcome = self
                .worker
                .call(&self.news_breaker, async move { source.summarize().await })
                .await;
            if outcome.is_timeout() {
                enrichment.timeouts += 1;
            }
            enrichment.news = Some(match outcome {
                CallOutcome::Ok(summary) => summary,
                CallOutcome::Timeout => "timeout".to_string(),
                CallOutcome::CircuitOpen => "circuit open".to_string(),
                CallOutcome::Error(_) => "unavailable".to_string(),
            });
        }

        debug!(
            signals = %enrichment.signals,
            news = enrichment.news.is_some(),
            timeouts = enrichment.timeouts,
            "Enrichment gathered"
        );
        enrichment
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
