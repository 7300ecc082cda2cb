//! Market data collaborators.
//!
//! Defines the `SnapshotSource` trait the scanner pulls from, and a JSON
//! file feed. Exchange connectivity lives outside this crate; feeds only
//! hand over normalised snapshots.

pub mod indicators;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::types::{DataError, MarketSnapshot};

/// Abstraction over snapshot producers.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot for one instrument.
    async fn fetch(&self, instrument_id: &str) -> Result<MarketSnapshot, DataError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Reads snapshots from a JSON file holding an array of snapshots.
///
/// The file is re-read on every fetch so an external process can keep
/// rewriting it between scans.
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self, instrument_id: &str) -> Result<HashMap<String, MarketSnapshot>, DataError> {
        let feed_err = |message: String| DataError::Feed {
            instrument: instrument_id.to_string(),
            message,
        };

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| feed_err(format!("read {}: {e}", self.path.display())))?;
        let snapshots: Vec<MarketSnapshot> =
            serde_json::from_str(&raw).map_err(|e| feed_err(format!("parse: {e}")))?;

        Ok(snapshots
            .into_iter()
            .map(|s| (s.instrument_id.clone(), s))
            .collect())
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn fetch(&self, instrument_id: &str) -> Result<MarketSnapshot, DataError> {
        let mut all = self.load(instrument_id).await?;
        let snapshot = all.remove(instrument_id).ok_or_else(|| DataError::Feed {
            instrument: instrument_id.to_string(),
            message: "instrument not in feed".to_string(),
        })?;
        debug!(instrument = instrument_id, price = snapshot.price, "Snapshot loaded");
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "file"
    }
}
