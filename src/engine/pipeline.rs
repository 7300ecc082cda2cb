//! Decision pipeline.
//!
//! Runs one snapshot through a strictly ordered sequence of gates:
//!
//! Liquidity → Trigger → Probability → Edge → Validator → Sizing → Risk → Execute
//!
//! Each gate either passes (and the next one runs) or rejects, which ends
//! the evaluation. Every evaluation yields exactly one [`DecisionTrace`]
//! holding the gate outcomes in order, the terminal decision, and every
//! intermediate object for downstream logging.
//!
//! The pipeline owns all mutable strategy state (estimator, risk manager,
//! volatility history, position book, portfolio). It is driven by a
//! single caller, so updates are totally ordered.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::advisors::{ExternalValidator, ValidationContext, ValidationResult};
use crate::alerts::{self, Channel, NotificationSink};
use crate::config::{AppConfig, SignalConfig, TierSchedule, ValidatorConfig};
use crate::engine::accountant::Portfolio;
use crate::engine::enricher::Enrichment;
use crate::engine::executor::{ClosedPosition, OpenPosition, OrderPlan, PositionBook};
use crate::journal::{CloseRecord, EntryRecord, Journal, JournalRecord};
use crate::resilience::{BoundedWorker, BreakerStatus, CallOutcome, CircuitBreaker};
use crate::strategy::edge::{EdgeDetector, EdgeReport, LiquidityReport, LiquidityVerdict};
use crate::strategy::kelly::{PositionSizer, SizingResult};
use crate::strategy::probability::{Estimate, ProbabilityEstimator, TradeResolution};
use crate::strategy::risk::{RiskCheck, RiskManager};
use crate::strategy::trigger::{Trigger, TriggerDetector};
use crate::types::{DataError, HourTier, MarketSnapshot};

/// Signal name for the trigger-derived opinion.
pub const TECHNICAL_SIGNAL: &str = "technical";

/// Deadline for fire-and-forget notifications.
const NOTIFY_DEADLINE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Liquidity,
    Trigger,
    Probability,
    Edge,
    Validator,
    Sizing,
    Risk,
    Execute,
}

impl Gate {
    /// Evaluation order.
    pub const ORDER: [Gate; 8] = [
        Gate::Liquidity,
        Gate::Trigger,
        Gate::Probability,
        Gate::Edge,
        Gate::Validator,
        Gate::Sizing,
        Gate::Risk,
        Gate::Execute,
    ];
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Gate::Liquidity => "liquidity",
            Gate::Trigger => "trigger",
            Gate::Probability => "probability",
            Gate::Edge => "edge",
            Gate::Validator => "validator",
            Gate::Sizing => "sizing",
            Gate::Risk => "risk",
            Gate::Execute => "execute",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateOutcome {
    pub gate: Gate,
    pub passed: bool,
    pub detail: String,
}

/// Terminal state of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approved { trade_id: Uuid, plan: OrderPlan, size_usd: f64 },
    Rejected { gate: Gate, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrace {
    pub instrument_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub tier: HourTier,
    pub gates: Vec<GateOutcome>,
    pub decision: Decision,
    pub liquidity: Option<LiquidityReport>,
    pub trigger: Option<Trigger>,
    pub estimate: Option<Estimate>,
    pub edge: Option<EdgeReport>,
    pub validation: Option<ValidationResult>,
    pub sizing: Option<SizingResult>,
    pub risk: Option<RiskCheck>,
    pub plan: Option<OrderPlan>,
    /// Guarded calls made during this evaluation that hit their deadline.
    pub timeouts: u32,
}

impl DecisionTrace {
    pub fn is_approved(&self) -> bool {
        matches!(self.decision, Decision::Approved { .. })
    }

    pub fn rejected_at(&self) -> Option<Gate> {
        match &self.decision {
            Decision::Rejected { gate, .. } => Some(*gate),
            Decision::Approved { .. } => None,
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match &self.decision {
            Decision::Rejected { reason, .. } => Some(reason),
            Decision::Approved { .. } => None,
        }
    }

    /// True once the trigger gate passed.
    pub fn triggered(&self) -> bool {
        self.gates
            .iter()
            .any(|g| g.gate == Gate::Trigger && g.passed)
    }
}

/// Accumulates gate outcomes while an evaluation is in progress.
struct TraceBuilder {
    trace: DecisionTrace,
    /// Index into `Gate::ORDER` of the gate being evaluated.
    next: usize,
}

impl TraceBuilder {
    fn new(instrument_id: &str, now: DateTime<Utc>, tier: HourTier) -> Self {
        Self {
            trace: DecisionTrace {
                instrument_id: instrument_id.to_string(),
                evaluated_at: now,
                tier,
                gates: Vec::with_capacity(Gate::ORDER.len()),
                decision: Decision::Rejected {
                    gate: Gate::Liquidity,
                    reason: "not evaluated".to_string(),
                },
                liquidity: None,
                trigger: None,
                estimate: None,
                edge: None,
                validation: None,
                sizing: None,
                risk: None,
                plan: None,
                timeouts: 0,
            },
            next: 0,
        }
    }

    fn current(&self) -> Gate {
        Gate::ORDER[self.next.min(Gate::ORDER.len() - 1)]
    }

    fn pass(&mut self, detail: impl Into<String>) {
        let gate = self.current();
        self.trace.gates.push(GateOutcome {
            gate,
            passed: true,
            detail: detail.into(),
        });
        self.next += 1;
    }

    fn reject(mut self, reason: impl Into<String>) -> DecisionTrace {
        let gate = self.current();
        let reason = reason.into();
        debug!(
            instrument = %self.trace.instrument_id,
            %gate,
            reason = %reason,
            "Rejected"
        );
        self.trace.gates.push(GateOutcome {
            gate,
            passed: false,
            detail: reason.clone(),
        });
        self.trace.decision = Decision::Rejected { gate, reason };
        self.trace
    }

    fn approve(mut self, trade_id: Uuid, plan: OrderPlan, size_usd: f64) -> DecisionTrace {
        self.pass(format!("paper position {trade_id} opened"));
        self.trace.decision = Decision::Approved {
            trade_id,
            plan,
            size_usd,
        };
        self.trace
    }
}

// ---------------------------------------------------------------------------
// Volatility tracking
// ---------------------------------------------------------------------------

/// Per-instrument history of `std_20 / price`, used to scale sizing when
/// volatility runs above its recent norm.
#[derive(Debug)]
pub struct VolatilityTracker {
    history: HashMap<String, VecDeque<f64>>,
    capacity: usize,
    min_samples: usize,
}

impl Default for VolatilityTracker {
    fn default() -> Self {
        Self::new(60, 5)
    }
}

impl VolatilityTracker {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            history: HashMap::new(),
            capacity: capacity.max(1),
            min_samples,
        }
    }

    /// Record the snapshot's volatility and return current / median of the
    /// prior history. 1.0 until enough history exists.
    pub fn observe(&mut self, snapshot: &MarketSnapshot) -> f64 {
        let current = if snapshot.price > 0.0 {
            snapshot.std_20 / snapshot.price
        } else {
            0.0
        };
        let history = self
            .history
            .entry(snapshot.instrument_id.clone())
            .or_default();

        let ratio = match median(history) {
            Some(m) if history.len() >= self.min_samples && m > 0.0 => current / m,
            _ => 1.0,
        };

        history.push_back(current);
        while history.len() > self.capacity {
            history.pop_front();
        }
        ratio
    }
}

fn median(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct DecisionPipeline {
    trigger: TriggerDetector,
    estimator: ProbabilityEstimator,
    edge: EdgeDetector,
    sizer: PositionSizer,
    risk: RiskManager,
    volatility: VolatilityTracker,
    book: PositionBook,
    portfolio: Portfolio,
    signals: SignalConfig,
    validator_config: ValidatorConfig,
    tiers: TierSchedule,
    journal: Arc<dyn Journal>,
    validator: Option<Arc<dyn ExternalValidator>>,
    validator_breaker: CircuitBreaker,
    notifier: Option<Arc<dyn NotificationSink>>,
    worker: BoundedWorker,
}

impl DecisionPipeline {
    pub fn new(config: &AppConfig, journal: Arc<dyn Journal>) -> Self {
        Self {
            trigger: TriggerDetector::new(config.trigger.clone()),
            estimator: ProbabilityEstimator::new(&config.signals),
            edge: EdgeDetector::new(config.edge.clone()),
            sizer: PositionSizer::new(config.sizing.clone()),
            risk: RiskManager::new(config.risk.clone()),
            volatility: VolatilityTracker::default(),
            book: PositionBook::new(),
            portfolio: Portfolio::new(config.agent.starting_capital),
            signals: config.signals.clone(),
            validator_config: config.validator.clone(),
            tiers: config.tiers.clone(),
            journal,
            validator: None,
            validator_breaker: CircuitBreaker::new("validator", &config.breaker),
            notifier: None,
            worker: BoundedWorker::new(config.scan.worker_slots, config.scan.call_timeout()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ExternalValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Share a worker (and its slots) with other guarded callers.
    pub fn with_worker(mut self, worker: BoundedWorker) -> Self {
        self.worker = worker;
        self
    }

    /// Replace the risk manager, e.g. to resume from exported state.
    pub fn with_risk_manager(mut self, risk: RiskManager) -> Self {
        self.risk = risk;
        self
    }

    pub fn worker(&self) -> &BoundedWorker {
        &self.worker
    }

    pub fn estimator(&self) -> &ProbabilityEstimator {
        &self.estimator
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn validator_breaker(&self) -> BreakerStatus {
        self.validator_breaker.status()
    }

    /// Evaluate with no external signals, at the current time.
    pub async fn evaluate(&mut self, snapshot: &MarketSnapshot) -> Result<DecisionTrace, DataError> {
        self.evaluate_with(snapshot, &Enrichment::default(), Utc::now())
            .await
    }

    /// Run every gate for `snapshot`. A malformed snapshot is returned as
    /// an error before any state is touched.
    pub async fn evaluate_with(
        &mut self,
        snapshot: &MarketSnapshot,
        enrichment: &Enrichment,
        now: DateTime<Utc>,
    ) -> Result<DecisionTrace, DataError> {
        snapshot.validate()?;

        let tier = self.tiers.tier_for_hour(now.hour());
        let volatility_ratio = self.volatility.observe(snapshot);
        let mut t = TraceBuilder::new(&snapshot.instrument_id, now, tier);

        // Liquidity
        let liquidity = self.edge.liquidity(snapshot);
        let verdict = self.edge.judge_liquidity(&liquidity);
        t.trace.liquidity = Some(liquidity.clone());
        match verdict {
            LiquidityVerdict::Ok => t.pass(format!(
                "score {:.2}, spread {:.4}%",
                liquidity.score,
                liquidity.spread_pct * 100.0
            )),
            LiquidityVerdict::LowScore { score, min } => {
                return Ok(t.reject(format!("liquidity score {score:.2} < {min:.2}")));
            }
            LiquidityVerdict::WideSpread { spread_pct, max } => {
                return Ok(t.reject(format!("spread {spread_pct:.5} > {max:.5}")));
            }
        }

        // Trigger
        let trigger = self.trigger.detect(snapshot);
        t.trace.trigger = Some(trigger.clone());
        if !trigger.is_triggered() {
            return Ok(t.reject(trigger.to_string()));
        }
        t.pass(trigger.to_string());

        // Probability
        let mut signals = enrichment.signals.clone();
        if self.signals.technical_signal {
            signals.insert(TECHNICAL_SIGNAL, trigger.technical_signal());
        }
        let estimate = self
            .estimator
            .estimate(self.signals.prior_probability, &signals);
        let posterior = estimate.posterior;
        t.pass(format!(
            "posterior {posterior:.3} from prior {:.3} ({signals})",
            estimate.prior
        ));
        t.trace.estimate = Some(estimate);

        // Edge
        let edge = self.edge.check(posterior, &trigger);
        let has_edge = edge.has_edge;
        let reason = edge.reason.clone();
        t.trace.edge = Some(edge);
        if !has_edge {
            return Ok(t.reject(reason));
        }
        t.pass(reason);

        // Validator
        match self
            .validate(snapshot, &trigger, posterior, enrichment.news.clone())
            .await
        {
            None => t.pass("no validator configured"),
            Some((result, timed_out)) => {
                if timed_out {
                    t.trace.timeouts += 1;
                }
                let ok = result.approved && result.confidence >= self.validator_config.min_confidence;
                let detail = format!(
                    "approved={} confidence {:.2} (min {:.2}): {}",
                    result.approved, result.confidence, self.validator_config.min_confidence, result.reason
                );
                t.trace.validation = Some(result);
                if !ok {
                    return Ok(t.reject(detail));
                }
                t.pass(detail);
            }
        }

        // Sizing
        let Some(plan) = OrderPlan::from_trigger(&trigger, snapshot.price) else {
            return Ok(t.reject("no order plan for trigger"));
        };
        t.trace.plan = Some(plan.clone());
        let sizing = self.sizer.calculate(
            plan.win_probability(posterior),
            plan.payout_ratio,
            tier,
            self.portfolio.value_f64(),
            self.portfolio.trades_opened,
            volatility_ratio,
        );
        let size_usd = sizing.size_usd;
        let sizing_reason = sizing.reason.clone();
        t.trace.sizing = Some(sizing);
        if let Some(reason) = sizing_reason {
            return Ok(t.reject(reason));
        }
        let min_notional = self.sizer.config().min_notional;
        if size_usd < min_notional {
            return Ok(t.reject(format!(
                "position too small (${size_usd:.2} < ${min_notional:.2})"
            )));
        }
        t.pass(format!("size ${size_usd:.2} (vol ratio {volatility_ratio:.2})"));

        // Risk
        let check = self.risk.check_trade_at(
            size_usd,
            self.portfolio.value_f64(),
            self.book.positions(),
            tier,
            now,
        );
        let risk_reason = check.reason.clone();
        t.trace.risk = Some(check);
        if let Some(reason) = risk_reason {
            return Ok(t.reject(reason.to_string()));
        }
        t.pass("risk limits ok");

        // Execute
        let estimate = t.trace.estimate.as_ref();
        let position = OpenPosition {
            trade_id: Uuid::new_v4(),
            instrument_id: snapshot.instrument_id.clone(),
            plan: plan.clone(),
            size_usd,
            prediction_id: estimate.map(|e| e.prediction_id).unwrap_or_default(),
            posterior,
            signals: signals.used(),
            tier,
            opened_at: now,
        };
        let entry = JournalRecord::Entry(EntryRecord {
            trade_id: position.trade_id,
            instrument_id: position.instrument_id.clone(),
            side: plan.side,
            entry_price: plan.entry_price,
            target_price: plan.target_price,
            stop_price: plan.stop_price,
            size_usd,
            posterior,
            win_probability: plan.win_probability(posterior),
            prediction_id: position.prediction_id,
            tier,
            signals: position.signals.clone(),
            timestamp: now,
        });
        if let Err(e) = self.journal.append(entry) {
            warn!(instrument = %snapshot.instrument_id, error = %e, "Journal append failed");
            return Ok(t.reject(format!("journal append failed: {e}")));
        }

        let trade_id = position.trade_id;
        self.book.open(position);
        self.portfolio.record_open();

        info!(
            instrument = %snapshot.instrument_id,
            side = %plan.side,
            posterior = format!("{posterior:.3}"),
            size_usd = format!("${size_usd:.2}"),
            %tier,
            "Trade approved"
        );
        self.notify(
            Channel::Signals,
            format!(
                "{} {} triggered: {} posterior {posterior:.3}",
                snapshot.instrument_id, plan.side, trigger
            ),
        );
        self.notify(
            Channel::Executor,
            format!(
                "[PAPER] {} {} ${size_usd:.2} @ {:.4} (target {:.4}, stop {:.4})",
                plan.side, snapshot.instrument_id, plan.entry_price, plan.target_price, plan.stop_price
            ),
        );

        Ok(t.approve(trade_id, plan, size_usd))
    }

    /// Consult the validator, if one is wired and enabled. Any failure
    /// becomes a conservative verdict. The flag reports a timeout.
    async fn validate(
        &self,
        snapshot: &MarketSnapshot,
        trigger: &Trigger,
        posterior: f64,
        news: Option<String>,
    ) -> Option<(ValidationResult, bool)> {
        if !self.validator_config.enabled {
            return None;
        }
        let validator = Arc::clone(self.validator.as_ref()?);
        let context = ValidationContext {
            snapshot: snapshot.clone(),
            trigger: trigger.clone(),
            posterior,
            portfolio_value: self.portfolio.value_f64(),
            news,
        };

        let outcome = self
            .worker
            .call(&self.validator_breaker, async move {
                validator.validate(&context).await
            })
            .await;

        let timed_out = outcome.is_timeout();
        let result = match outcome {
            CallOutcome::Ok(mut r) => {
                r.confidence = if r.confidence.is_finite() {
                    r.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                r
            }
            CallOutcome::Timeout => ValidationResult::conservative("validator timed out"),
            CallOutcome::CircuitOpen => ValidationResult::conservative("validator circuit open"),
            CallOutcome::Error(e) => ValidationResult::conservative(format!("validator error: {e}")),
        };
        Some((result, timed_out))
    }

    /// Close every open position on this instrument whose target or stop
    /// the snapshot price has crossed, and feed the results back into the
    /// ledger, the risk manager and the estimator.
    pub fn mark_to_market(&mut self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Vec<CloseRecord> {
        let closed = self
            .book
            .mark_to_market(&snapshot.instrument_id, snapshot.price);
        closed
            .into_iter()
            .map(|c| self.settle(c, now))
            .collect()
    }

    fn settle(&mut self, closed: ClosedPosition, now: DateTime<Utc>) -> CloseRecord {
        let ClosedPosition {
            position,
            exit_price,
            exit_reason,
            pnl_usd,
            outcome,
        } = closed;

        let value = self.portfolio.record_close(pnl_usd);
        self.risk.record_trade_result_at(pnl_usd, value, now);
        self.estimator.update_reliability(&TradeResolution {
            side: position.plan.side,
            outcome,
            signals_used: position.signals.clone(),
        });
        if let Some(moved_up) = outcome.direction(position.plan.side) {
            self.estimator.mark_outcome_for(position.prediction_id, moved_up);
        }

        let record = CloseRecord {
            trade_id: position.trade_id,
            instrument_id: position.instrument_id.clone(),
            side: position.plan.side,
            entry_price: position.plan.entry_price,
            target_price: position.plan.target_price,
            stop_price: position.plan.stop_price,
            exit_price,
            size_usd: position.size_usd,
            pnl_usd,
            outcome,
            posterior: position.posterior,
            win_probability: position.plan.win_probability(position.posterior),
            tier: position.tier,
            opened_at: position.opened_at,
            timestamp: now,
        };
        if let Err(e) = self.journal.append(JournalRecord::Close(record.clone())) {
            warn!(trade_id = %record.trade_id, error = %e, "Journal append failed on close");
        }

        info!(
            trade_id = %record.trade_id,
            instrument = %record.instrument_id,
            ?exit_reason,
            %outcome,
            pnl = format!("${pnl_usd:.2}"),
            portfolio = format!("${value:.2}"),
            "Position closed"
        );
        self.notify(
            Channel::Alerts,
            format!(
                "{} {} closed ({exit_reason:?}): {outcome} ${pnl_usd:.2}",
                record.instrument_id, record.side
            ),
        );
        for alert in self.risk.drain_alerts() {
            warn!(kind = %alert.kind, "{}", alert.message);
            self.notify(Channel::Alerts, format!("[{}] {}", alert.kind, alert.message));
        }

        record
    }

    fn notify(&self, channel: Channel, text: String) {
        if let Some(sink) = &self.notifier {
            alerts::notify(sink, channel, text, NOTIFY_DEADLINE);
        }
    }

    /// Reliability table, Brier score and ledger summary.
    pub fn log_report(&self) {
        self.estimator.log_report();
        let status = self.risk.status(Utc::now());
        info!(
            portfolio = format!("${:.2}", self.portfolio.value),
            realized = format!("${:.2}", self.portfolio.realized_pnl),
            opened = self.portfolio.trades_opened,
            closed = self.portfolio.trades_closed,
            open = self.book.len(),
            drawdown = format!("{:.2}%", status.drawdown * 100.0),
            paused = status.paused,
            "Pipeline report"
        );
    }

    /// Reliability per source, for reporting.
    pub fn reliability(&self) -> BTreeMap<String, f64> {
        self.estimator.reliability_report()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisors::MockExternalValidator;
    use crate::journal::{JournalError, MemoryJournal};
    use crate::types::OutcomeLabel;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    fn pipeline(journal: Arc<MemoryJournal>) -> DecisionPipeline {
        DecisionPipeline::new(&AppConfig::default(), journal)
    }

    fn snapshot(rsi: f64) -> MarketSnapshot {
        MarketSnapshot {
            rsi_14: rsi,
            ..MarketSnapshot::sample()
        }
    }

    struct FailingJournal;

    impl Journal for FailingJournal {
        fn append(&self, _record: JournalRecord) -> Result<(), JournalError> {
            Err(JournalError::Unavailable("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_approves_mean_reversion() {
        let journal = Arc::new(MemoryJournal::new());
        let mut p = pipeline(journal.clone());
        let trace = p
            .evaluate_with(&snapshot(30.0), &Enrichment::default(), now())
            .await
            .unwrap();

        assert!(trace.is_approved(), "{:?}", trace.decision);
        let gates: Vec<Gate> = trace.gates.iter().map(|g| g.gate).collect();
        assert_eq!(gates, Gate::ORDER.to_vec());
        assert!(trace.gates.iter().all(|g| g.passed));

        let estimate = trace.estimate.as_ref().unwrap();
        assert!((estimate.posterior - 0.5).abs() < 1e-12);
        let sizing = trace.sizing.as_ref().unwrap();
        assert!((sizing.full_kelly - 0.25).abs() < 1e-9);
        assert!((sizing.fractional_kelly - 0.0625).abs() < 1e-9);
        // Bootstrap cohort: 2% of 1000.
        assert_eq!(sizing.size_usd, 20.0);

        assert_eq!(journal.len(), 1);
        assert_eq!(p.book().len(), 1);
        assert_eq!(p.portfolio().trades_opened, 1);
    }

    #[tokio::test]
    async fn test_rejects_without_trigger() {
        let mut p = pipeline(Arc::new(MemoryJournal::new()));
        let trace = p.evaluate(&snapshot(50.0)).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Trigger));
        let reason = trace.rejection_reason().unwrap();
        assert!(reason.contains("Z=-5.00"), "{reason}");
        assert!(reason.contains("RSI=50.0"), "{reason}");
        assert_eq!(trace.gates.len(), 2);
        assert!(trace.estimate.is_none());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_touches_nothing() {
        let mut p = pipeline(Arc::new(MemoryJournal::new()));
        let mut bad = snapshot(30.0);
        bad.price = f64::NAN;
        assert!(p.evaluate(&bad).await.is_err());
        assert_eq!(p.estimator().predictions().count(), 0);
    }

    #[tokio::test]
    async fn test_illiquid_rejected_first() {
        let mut p = pipeline(Arc::new(MemoryJournal::new()));
        let thin = MarketSnapshot {
            volume_24h: 10.0,
            ..snapshot(30.0)
        };
        let trace = p.evaluate(&thin).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Liquidity));
        assert!(trace.trigger.is_none());
    }

    #[tokio::test]
    async fn test_validator_low_confidence_rejects() {
        let mut validator = MockExternalValidator::new();
        validator.expect_validate().returning(|_| {
            Ok(ValidationResult {
                approved: true,
                confidence: 0.6,
                reason: "mixed picture".into(),
            })
        });
        validator.expect_name().return_const("mock".to_string());

        let mut p = pipeline(Arc::new(MemoryJournal::new())).with_validator(Arc::new(validator));
        let trace = p.evaluate(&snapshot(30.0)).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Validator));
        assert!(trace.sizing.is_none());
    }

    #[tokio::test]
    async fn test_validator_error_fails_closed() {
        let mut validator = MockExternalValidator::new();
        validator
            .expect_validate()
            .returning(|_| Err(anyhow::anyhow!("model unavailable")));

        let mut p = pipeline(Arc::new(MemoryJournal::new())).with_validator(Arc::new(validator));
        let trace = p.evaluate(&snapshot(30.0)).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Validator));
        let validation = trace.validation.unwrap();
        assert!(!validation.approved);
        assert_eq!(validation.confidence, 0.0);
        assert_eq!(p.validator_breaker().failures, 1);
    }

    #[tokio::test]
    async fn test_journal_failure_rejects_at_execute() {
        let mut p = DecisionPipeline::new(&AppConfig::default(), Arc::new(FailingJournal));
        let trace = p.evaluate(&snapshot(30.0)).await.unwrap();
        assert_eq!(trace.rejected_at(), Some(Gate::Execute));
        assert!(p.book().is_empty());
        assert_eq!(p.portfolio().trades_opened, 0);
    }

    #[tokio::test]
    async fn test_danger_tier_blocked_by_heat_cap() {
        let mut config = AppConfig::default();
        config.tiers.danger_hours = vec![12];
        let mut p = DecisionPipeline::new(&config, Arc::new(MemoryJournal::new()));
        let trace = p
            .evaluate_with(&snapshot(30.0), &Enrichment::default(), now())
            .await
            .unwrap();
        assert_eq!(trace.tier, HourTier::Danger);
        // Bootstrap cap still sizes the trade; the zero heat cap stops it.
        assert_eq!(trace.rejected_at(), Some(Gate::Risk));
        assert!(trace.rejection_reason().unwrap().contains("exceed 0%"));
    }

    #[tokio::test]
    async fn test_close_feeds_back() {
        let journal = Arc::new(MemoryJournal::new());
        let mut config = AppConfig::default();
        config.signals.technical_signal = true;
        let mut p = DecisionPipeline::new(&config, journal.clone());

        let trace = p
            .evaluate_with(&snapshot(30.0), &Enrichment::default(), now())
            .await
            .unwrap();
        assert!(trace.is_approved());
        let before = p.estimator().reliability(TECHNICAL_SIGNAL);

        // Entry 100, target 102.
        let up = MarketSnapshot {
            price: 102.5,
            best_bid: 102.49,
            best_ask: 102.51,
            ..snapshot(50.0)
        };
        let closes = p.mark_to_market(&up, now());
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].outcome, OutcomeLabel::Win);
        assert!(p.book().is_empty());
        assert!(p.portfolio().value_f64() > 1000.0);
        assert!(p.estimator().reliability(TECHNICAL_SIGNAL) > before);
        assert_eq!(p.estimator().predictions().last().unwrap().actual, Some(1.0));
        assert_eq!(journal.len(), 2);
        assert_eq!(p.risk().state().consecutive_losses, 0);
    }

    #[test]
    fn test_volatility_ratio() {
        let mut v = VolatilityTracker::new(60, 5);
        let mut snap = MarketSnapshot::sample();
        for _ in 0..5 {
            assert_eq!(v.observe(&snap), 1.0);
        }
        snap.std_20 = 5.0;
        assert!((v.observe(&snap) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        let odd: VecDeque<f64> = [3.0, 1.0, 2.0].into_iter().collect();
        assert_eq!(median(&odd), Some(2.0));
        let even: VecDeque<f64> = [4.0, 1.0, 2.0, 3.0].into_iter().collect();
        assert_eq!(median(&even), Some(2.5));
        assert_eq!(median(&VecDeque::new()), None);
    }
}
