//! Mock collaborators for integration testing.
//!
//! Deterministic, in-memory implementations of every collaborator trait
//! the pipeline and scheduler talk to. Delays and failures are
//! controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sentinel::advisors::{ExternalValidator, SentimentSource, ValidationContext, ValidationResult};
use sentinel::alerts::{Channel, NotificationSink};
use sentinel::data::SnapshotSource;
use sentinel::engine::scanner::ShutdownHandle;
use sentinel::journal::{Journal, JournalError, JournalRecord};
use sentinel::types::{DataError, MarketSnapshot};

/// Snapshot with a tight book and deep volume.
pub fn snapshot(instrument: &str, price: f64, ma_20: f64, std_20: f64, rsi_14: f64) -> MarketSnapshot {
    MarketSnapshot {
        instrument_id: instrument.to_string(),
        price,
        best_bid: price - 0.01,
        best_ask: price + 0.01,
        volume_24h: 5_000_000.0,
        ma_20,
        std_20,
        rsi_14,
        candles: None,
        observed_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Snapshot feed
// ---------------------------------------------------------------------------

pub struct MockFeed {
    snapshots: Mutex<HashMap<String, MarketSnapshot>>,
    delay: Mutex<Option<Duration>>,
    /// Panic on this fetch number (1-based).
    panic_on: Mutex<Option<usize>>,
    /// Trigger shutdown once this many fetches have started.
    stop_after: Mutex<Option<(usize, ShutdownHandle)>>,
    fetches: AtomicUsize,
}

impl MockFeed {
    pub fn new(snapshots: Vec<MarketSnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(
                snapshots
                    .into_iter()
                    .map(|s| (s.instrument_id.clone(), s))
                    .collect(),
            ),
            delay: Mutex::new(None),
            panic_on: Mutex::new(None),
            stop_after: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn panic_on_fetch(&self, n: usize) {
        *self.panic_on.lock().unwrap() = Some(n);
    }

    pub fn stop_after(&self, n: usize, shutdown: ShutdownHandle) {
        *self.stop_after.lock().unwrap() = Some((n, shutdown));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockFeed {
    async fn fetch(&self, instrument_id: &str) -> Result<MarketSnapshot, DataError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((limit, shutdown)) = self.stop_after.lock().unwrap().as_ref() {
            if n >= *limit {
                shutdown.trigger();
            }
        }
        if *self.panic_on.lock().unwrap() == Some(n) {
            panic!("feed exploded on fetch {n}");
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.snapshots
            .lock()
            .unwrap()
            .get(instrument_id)
            .cloned()
            .ok_or_else(|| DataError::Feed {
                instrument: instrument_id.to_string(),
                message: "not in mock feed".to_string(),
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct MockValidator {
    response: Mutex<Result<ValidationResult, String>>,
    delay: Mutex<Option<Duration>>,
    calls: Arc<AtomicUsize>,
}

impl MockValidator {
    pub fn approving(confidence: f64) -> Self {
        Self {
            response: Mutex::new(Ok(ValidationResult {
                approved: true,
                confidence,
                reason: "setup confirmed".to_string(),
            })),
            delay: Mutex::new(None),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        let v = Self::approving(1.0);
        *v.response.lock().unwrap() = Err(message.to_string());
        v
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalValidator for MockValidator {
    async fn validate(&self, _context: &ValidationContext) -> Result<ValidationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }

    fn name(&self) -> &str {
        "mock-validator"
    }
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

pub struct MockSentiment {
    value: f64,
    delay: Option<Duration>,
}

impl MockSentiment {
    pub fn new(value: f64) -> Self {
        Self { value, delay: None }
    }

    pub fn slow(value: f64, delay: Duration) -> Self {
        Self {
            value,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl SentimentSource for MockSentiment {
    async fn classify(&self) -> Result<f64> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.value)
    }

    fn name(&self) -> &str {
        "mock-sentiment"
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Channel, String)>>,
}

impl RecordingNotifier {
    pub fn on(&self, channel: Channel) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, channel: Channel, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push((channel, text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Panics when asked to journal an entry for one poisoned instrument.
pub struct TrippingJournal {
    pub poisoned: String,
    pub appended: AtomicUsize,
}

impl TrippingJournal {
    pub fn new(poisoned: &str) -> Self {
        Self {
            poisoned: poisoned.to_string(),
            appended: AtomicUsize::new(0),
        }
    }
}

impl Journal for TrippingJournal {
    fn append(&self, record: JournalRecord) -> Result<(), JournalError> {
        if let JournalRecord::Entry(entry) = &record {
            if entry.instrument_id == self.poisoned {
                panic!("journal tripped on {}", entry.instrument_id);
            }
        }
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
