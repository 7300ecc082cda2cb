//! Scan scheduler.
//!
//! Drives the decision pipeline over a fixed instrument list, one
//! instrument at a time in list order. Snapshot fetches and guarded
//! advisor calls run under a hard deadline; cycles that hit a deadline
//! stretch the next sleep by a capped additive backoff.
//!
//! The loop only exits through the cooperative shutdown flag. A panic
//! while fetching or evaluating one instrument is logged and the cycle
//! moves on; a panic anywhere else in the cycle is caught at the outer
//! level and retried after a fixed delay.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::ScanConfig;
use crate::data::SnapshotSource;
use crate::engine::accountant::{Accountant, CycleReport};
use crate::engine::enricher::{Enricher, Enrichment};
use crate::engine::pipeline::{DecisionPipeline, DecisionTrace};
use crate::types::MarketSnapshot;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Cooperative shutdown flag shared between the scheduler and whatever
/// listens for the stop signal.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Sleep planning
// ---------------------------------------------------------------------------

/// Sleep before the next cycle:
/// `max(min_sleep, interval - elapsed) + min(step * consecutive_timeouts, cap)`.
pub fn plan_sleep(config: &ScanConfig, elapsed: Duration, consecutive_timeouts: u32) -> Duration {
    let base = config
        .interval()
        .saturating_sub(elapsed)
        .max(Duration::from_secs(config.min_sleep_secs));
    let backoff = Duration::from_secs(
        config
            .timeout_backoff_step_secs
            .saturating_mul(u64::from(consecutive_timeouts))
            .min(config.timeout_backoff_cap_secs),
    );
    base + backoff
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct ScanScheduler {
    config: ScanConfig,
    instruments: Vec<String>,
    source: Arc<dyn SnapshotSource>,
    enricher: Enricher,
    pipeline: DecisionPipeline,
    shutdown: ShutdownHandle,
    cycle: u64,
    consecutive_timeouts: u32,
}

impl ScanScheduler {
    pub fn new(
        config: ScanConfig,
        instruments: Vec<String>,
        source: Arc<dyn SnapshotSource>,
        enricher: Enricher,
        pipeline: DecisionPipeline,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            config,
            instruments,
            source,
            enricher,
            pipeline,
            shutdown,
            cycle: 0,
            consecutive_timeouts: 0,
        }
    }

    pub fn pipeline(&self) -> &DecisionPipeline {
        &self.pipeline
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Run cycles until shutdown is requested.
    pub async fn run(&mut self) {
        info!(
            instruments = self.instruments.len(),
            interval_secs = self.config.interval_secs,
            deadline_ms = self.config.call_timeout_ms,
            source = self.source.name(),
            "Scan loop started"
        );

        while !self.shutdown.is_triggered() {
            let started = Instant::now();
            let result = AssertUnwindSafe(self.run_once()).catch_unwind().await;

            let pause = match result {
                Ok(report) => {
                    if report.timed_out() {
                        self.consecutive_timeouts += 1;
                    } else {
                        self.consecutive_timeouts = 0;
                    }
                    plan_sleep(&self.config, started.elapsed(), self.consecutive_timeouts)
                }
                Err(panic) => {
                    error!(
                        error = %panic_message(panic.as_ref()),
                        retry_secs = self.config.error_retry_secs,
                        "Scan cycle failed"
                    );
                    Duration::from_secs(self.config.error_retry_secs)
                }
            };

            if self.shutdown.is_triggered() {
                break;
            }
            debug!(
                sleep_ms = pause.as_millis() as u64,
                consecutive_timeouts = self.consecutive_timeouts,
                "Sleeping until next cycle"
            );
            self.sleep(pause).await;
        }

        info!(cycles = self.cycle, "Scan loop stopped");
    }

    /// One pass over every instrument.
    pub async fn run_once(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle_number: self.cycle,
            ..Default::default()
        };
        info!(cycle = self.cycle, "Starting cycle");

        let enrichment = self.enricher.gather().await;
        report.timeouts += enrichment.timeouts;

        for instrument in self.instruments.clone() {
            if self.shutdown.is_triggered() {
                info!(cycle = self.cycle, "Shutdown requested, ending cycle early");
                break;
            }
            report.instruments_scanned += 1;

            let scanned = AssertUnwindSafe(self.scan_instrument(&instrument, &enrichment))
                .catch_unwind()
                .await;
            match scanned {
                Ok(InstrumentScan::Unavailable { timed_out }) => {
                    report.skipped += 1;
                    if timed_out {
                        report.timeouts += 1;
                    }
                }
                Ok(InstrumentScan::Refused { closed }) => {
                    report.closed += closed;
                    report.skipped += 1;
                }
                Ok(InstrumentScan::Evaluated { closed, trace }) => {
                    report.closed += closed;
                    report.timeouts += trace.timeouts;
                    if trace.triggered() {
                        report.triggered += 1;
                    }
                    if trace.is_approved() {
                        report.approved += 1;
                    }
                    log_trace(&trace);
                }
                Err(panic) => {
                    error!(
                        instrument = %instrument,
                        error = %panic_message(panic.as_ref()),
                        "Instrument scan panicked, continuing with next instrument"
                    );
                    report.failed += 1;
                }
            }
        }

        Accountant::reconcile(
            self.pipeline.portfolio(),
            self.pipeline.book().len(),
            &mut report,
        );
        report
    }

    /// Fetch, settle and evaluate one instrument.
    async fn scan_instrument(&mut self, instrument: &str, enrichment: &Enrichment) -> InstrumentScan {
        let snapshot = match self.fetch(instrument).await {
            Ok(snapshot) => snapshot,
            Err(timed_out) => return InstrumentScan::Unavailable { timed_out },
        };

        let now = Utc::now();
        let closed = self.pipeline.mark_to_market(&snapshot, now).len();
        match self.pipeline.evaluate_with(&snapshot, enrichment, now).await {
            Ok(trace) => InstrumentScan::Evaluated { closed, trace },
            Err(e) => {
                warn!(instrument, error = %e, "Evaluation refused snapshot");
                InstrumentScan::Refused { closed }
            }
        }
    }

    /// Fetch and validate one snapshot. The error flags a deadline expiry.
    async fn fetch(&self, instrument: &str) -> Result<MarketSnapshot, bool> {
        let deadline = self.config.call_timeout();
        let snapshot = match tokio::time::timeout(deadline, self.source.fetch(instrument)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!(instrument, error = %e, "Snapshot unavailable, skipping");
                return Err(false);
            }
            Err(_) => {
                warn!(
                    instrument,
                    deadline_ms = deadline.as_millis() as u64,
                    "Snapshot fetch timed out, skipping"
                );
                return Err(true);
            }
        };

        if let Err(e) = snapshot.validate() {
            warn!(instrument, error = %e, "Malformed snapshot, skipping");
            return Err(false);
        }
        Ok(snapshot)
    }

    /// Sleep in short increments so shutdown is noticed promptly.
    async fn sleep(&self, total: Duration) {
        let step = Duration::from_millis(self.config.shutdown_poll_ms.max(1));
        let mut remaining = total;
        while !remaining.is_zero() && !self.shutdown.is_triggered() {
            let nap = remaining.min(step);
            tokio::time::sleep(nap).await;
            remaining = remaining.saturating_sub(nap);
        }
    }
}

/// How one instrument's scan ended.
enum InstrumentScan {
    /// No usable snapshot.
    Unavailable { timed_out: bool },
    /// The pipeline refused the snapshot after settling positions.
    Refused { closed: usize },
    Evaluated { closed: usize, trace: DecisionTrace },
}

fn log_trace(trace: &DecisionTrace) {
    match trace.rejected_at() {
        None => info!(
            instrument = %trace.instrument_id,
            tier = %trace.tier,
            "Decision: approved"
        ),
        Some(gate) => debug!(
            instrument = %trace.instrument_id,
            %gate,
            reason = trace.rejection_reason().unwrap_or_default(),
            "Decision: rejected"
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
