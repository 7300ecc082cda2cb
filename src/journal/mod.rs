//! Trade journal.
//!
//! Append-only sink receiving one ENTRY record per executed decision and
//! one CLOSE record per realised outcome. Where records end up (file,
//! database, chat log) is the implementor's business; the crate ships an
//! in-memory journal used by the binary and the tests.

pub mod stats;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::types::{HourTier, OutcomeLabel, Side};

pub use stats::{JournalStats, TierStats};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Opening leg of a paper trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub trade_id: Uuid,
    pub instrument_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_price: f64,
    pub size_usd: f64,
    /// Estimated probability of an up move.
    pub posterior: f64,
    /// Probability the trade wins; what sizing used.
    pub win_probability: f64,
    pub prediction_id: u64,
    pub tier: HourTier,
    pub signals: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Realised outcome of a paper trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRecord {
    pub trade_id: Uuid,
    pub instrument_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_price: f64,
    pub exit_price: f64,
    pub size_usd: f64,
    pub pnl_usd: f64,
    pub outcome: OutcomeLabel,
    pub posterior: f64,
    pub win_probability: f64,
    pub tier: HourTier,
    pub opened_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum JournalRecord {
    Entry(EntryRecord),
    Close(CloseRecord),
}

impl JournalRecord {
    pub fn trade_id(&self) -> Uuid {
        match self {
            JournalRecord::Entry(e) => e.trade_id,
            JournalRecord::Close(c) => c.trade_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal unavailable: {0}")]
    Unavailable(String),

    #[error("failed to serialise journal record: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

pub trait Journal: Send + Sync {
    fn append(&self, record: JournalRecord) -> Result<(), JournalError>;
}

/// Journal kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn records(&self) -> Vec<JournalRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Last `n` CLOSE records, oldest first.
    pub fn recent_closes(&self, n: usize) -> Vec<CloseRecord> {
        let closes: Vec<CloseRecord> = self
            .lock()
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Close(c) => Some(c.clone()),
                JournalRecord::Entry(_) => None,
            })
            .collect();
        let skip = closes.len().saturating_sub(n);
        closes.into_iter().skip(skip).collect()
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats::from_records(&self.lock())
    }

    /// Records as JSON lines, one per record.
    pub fn to_jsonl(&self) -> Result<String, JournalError> {
        let mut out = String::new();
        for record in self.lock().iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: JournalRecord) -> Result<(), JournalError> {
        debug!(trade_id = %record.trade_id(), "Journal append");
        self.lock().push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
