//! Outbound notifications.
//!
//! Sends are fire-and-forget: each message is spawned with a deadline
//! and a failure is only logged. Nothing here can change a decision.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Logical destination of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Triggered and approved decisions.
    Signals,
    /// Paper executions.
    Executor,
    /// Closed trades and risk alerts.
    Alerts,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Signals => write!(f, "signals"),
            Channel::Executor => write!(f, "executor"),
            Channel::Alerts => write!(f, "alerts"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: Channel, text: &str) -> Result<()>;
}

/// Writes every message to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, channel: Channel, text: &str) -> Result<()> {
        info!(%channel, "{text}");
        Ok(())
    }
}

/// Spawn a send and forget about it. Errors and overruns are logged.
pub fn notify(sink: &Arc<dyn NotificationSink>, channel: Channel, text: String, deadline: Duration) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        match tokio::time::timeout(deadline, sink.send(channel, &text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%channel, error = %e, "Notification failed"),
            Err(_) => warn!(%channel, "Notification timed out"),
        }
    });
}
