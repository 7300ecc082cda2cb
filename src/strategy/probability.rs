//! Bayesian probability estimation.
//!
//! Starts from a market-implied prior and folds in independent signal
//! sources one at a time. Each source is weighted by a reliability score
//! learned from closed trades with an exponential moving average. Every
//! estimate is recorded so calibration can be scored with a Brier score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

use crate::config::SignalConfig;
use crate::types::{OutcomeLabel, Side, SignalSet};

/// Probabilities are kept inside `[EPSILON, 1 - EPSILON]`; 0 and 1 make
/// the update degenerate.
pub const EPSILON: f64 = 0.001;

/// Reliability assigned to a source seen for the first time.
pub const DEFAULT_RELIABILITY: f64 = 0.5;

/// Brier score reported when nothing has been labelled yet.
pub const NEUTRAL_BRIER: f64 = 0.25;

/// Clip a probability to `[EPSILON, 1 - EPSILON]`. NaN maps to 0.5.
pub fn clip(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// One reliability-weighted Bayesian update.
///
/// A fully reliable source (`r = 1`) is taken at face value; a fully
/// unreliable one (`r = 0`) leaves the prior unchanged.
pub fn bayesian_update(prior: f64, signal: f64, reliability: f64) -> f64 {
    let likelihood_true = signal * reliability + (1.0 - reliability) * 0.5;
    let likelihood_false = (1.0 - signal) * reliability + (1.0 - reliability) * 0.5;

    let numerator = prior * likelihood_true;
    let denominator = numerator + (1.0 - prior) * likelihood_false;

    if denominator == 0.0 {
        return prior;
    }
    clip(numerator / denominator)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single source's contribution to an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalUpdate {
    pub source: String,
    pub signal: f64,
    pub reliability: f64,
    pub posterior: f64,
}

/// Result of one `estimate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub prediction_id: u64,
    /// Clipped market-implied prior.
    pub prior: f64,
    pub posterior: f64,
    /// Updates applied, in order.
    pub updates: Vec<SignalUpdate>,
}

/// Stored prediction, labelled once the outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub p_market: f64,
    pub posterior: f64,
    pub signals: BTreeMap<String, f64>,
    pub actual: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// What the reliability update needs to know about a closed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResolution {
    pub side: Side,
    pub outcome: OutcomeLabel,
    pub signals_used: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

pub struct ProbabilityEstimator {
    reliability: BTreeMap<String, f64>,
    ema_alpha: f64,
    history: VecDeque<PredictionRecord>,
    history_cap: usize,
    next_id: u64,
}

impl ProbabilityEstimator {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            reliability: config
                .initial_reliability
                .iter()
                .map(|(k, v)| (k.clone(), v.clamp(0.0, 1.0)))
                .collect(),
            ema_alpha: config.ema_alpha.clamp(0.0, 1.0),
            history: VecDeque::new(),
            history_cap: config.history_cap.max(1),
            next_id: 0,
        }
    }

    /// Current reliability of a source (0.5 if never seen).
    pub fn reliability(&self, source: &str) -> f64 {
        self.reliability
            .get(source)
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY)
    }

    /// Snapshot of the reliability table.
    pub fn reliability_report(&self) -> BTreeMap<String, f64> {
        self.reliability.clone()
    }

    /// Combine the market prior with every non-null signal, in source
    /// order, and record the prediction.
    pub fn estimate(&mut self, p_market: f64, signals: &SignalSet) -> Estimate {
        let prior = clip(p_market);
        let mut posterior = prior;
        let mut updates = Vec::new();

        for (source, value) in signals.opinions() {
            let signal = clip(value);
            let reliability = self.reliability(source);
            posterior = bayesian_update(posterior, signal, reliability);
            updates.push(SignalUpdate {
                source: source.to_string(),
                signal,
                reliability,
                posterior,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.history.push_back(PredictionRecord {
            id,
            p_market,
            posterior,
            signals: signals.used(),
            actual: None,
            recorded_at: Utc::now(),
        });
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }

        debug!(
            prediction_id = id,
            prior = format!("{prior:.3}"),
            posterior = format!("{posterior:.3}"),
            signals = updates.len(),
            "Posterior estimated"
        );

        Estimate {
            prediction_id: id,
            prior,
            posterior,
            updates,
        }
    }

    /// Learn from a closed trade. Only wins and losses carry information;
    /// anything else is ignored.
    ///
    /// A signal "pointed the right way" when it was above 0.5 for a buy or
    /// below 0.5 for a sell. It was correct when that matched the outcome.
    pub fn update_reliability(&mut self, trade: &TradeResolution) {
        let won = match trade.outcome {
            OutcomeLabel::Win => true,
            OutcomeLabel::Loss => false,
            OutcomeLabel::Void => return,
        };

        for (source, value) in &trade.signals_used {
            let pointed_with_trade = match trade.side {
                Side::Buy => *value > 0.5,
                Side::Sell => *value < 0.5,
            };
            let correct = if pointed_with_trade == won { 1.0 } else { 0.0 };

            let entry = self
                .reliability
                .entry(source.clone())
                .or_insert(DEFAULT_RELIABILITY);
            let old = *entry;
            *entry = (old * (1.0 - self.ema_alpha) + correct * self.ema_alpha).clamp(0.0, 1.0);

            debug!(
                source = %source,
                old = format!("{old:.3}"),
                new = format!("{:.3}", *entry),
                correct,
                "Reliability updated"
            );
        }
    }

    /// Attach a realised 0/1 outcome to the most recent prediction.
    pub fn mark_outcome(&mut self, actual: f64) {
        if let Some(last) = self.history.back_mut() {
            last.actual = Some(actual);
        }
    }

    /// Attach a realised outcome to a specific prediction. Returns false
    /// when the record has already been evicted.
    pub fn mark_outcome_for(&mut self, prediction_id: u64, actual: f64) -> bool {
        match self.history.iter_mut().rev().find(|r| r.id == prediction_id) {
            Some(record) => {
                record.actual = Some(actual);
                true
            }
            None => false,
        }
    }

    /// Mean squared error of the labelled predictions among the last `n`.
    /// 0.25 when none of them is labelled.
    pub fn brier_score(&self, n: usize) -> f64 {
        let skip = self.history.len().saturating_sub(n);
        let labelled: Vec<(f64, f64)> = self
            .history
            .iter()
            .skip(skip)
            .filter_map(|r| r.actual.map(|a| (r.posterior, a)))
            .collect();

        if labelled.is_empty() {
            return NEUTRAL_BRIER;
        }
        labelled.iter().map(|(p, a)| (p - a).powi(2)).sum::<f64>() / labelled.len() as f64
    }

    pub fn predictions(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.history.iter()
    }

    /// Log the reliability table at info level.
    pub fn log_report(&self) {
        for (source, reliability) in &self.reliability {
            info!(source = %source, reliability = format!("{reliability:.3}"), "Signal reliability");
        }
        info!(brier_20 = format!("{:.4}", self.brier_score(20)), "Calibration");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
