//! Progress reporting for scrape runs.
//!
//! The controller only knows the [`ProgressSink`] capability. Delivery is
//! best-effort: a sink never blocks the run and never reports failure back.
//!
//! | Sink | Destination |
//! |------|-------------|
//! | [`TracingReporter`] | the process log |
//! | [`BroadcastReporter`] | a `tokio::sync::broadcast` channel (SSE subscribers) |
//! | [`FanoutReporter`] | several sinks at once |

use crate::models::ProgressEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Fire-and-forget sink for human-readable progress messages.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn report(&self, message: &str) {
        (**self).report(message)
    }
}

/// Writes every message to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    run_id: Option<Uuid>,
}

impl TracingReporter {
    pub fn new(run_id: Option<Uuid>) -> Self {
        Self { run_id }
    }
}

impl ProgressSink for TracingReporter {
    fn report(&self, message: &str) {
        match self.run_id {
            Some(run_id) => info!(%run_id, "{message}"),
            None => info!("{message}"),
        }
    }
}

/// Pushes messages to every current subscriber of a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    run_id: Option<Uuid>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastReporter {
    pub fn new(run_id: Option<Uuid>, tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self { run_id, tx }
    }
}

impl ProgressSink for BroadcastReporter {
    fn report(&self, message: &str) {
        let event = ProgressEvent {
            run_id: self.run_id,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        // No receivers is fine; nobody is watching.
        if self.tx.send(event).is_err() {
            debug!("progress event dropped: no subscribers");
        }
    }
}

/// Forwards each message to every inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutReporter {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl ProgressSink for FanoutReporter {
    fn report(&self, message: &str) {
        for sink in &self.sinks {
            sink.report(message);
        }
    }
}

/// Collects messages in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[cfg(test)]
impl ProgressSink for RecordingReporter {
    fn report(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        let run_id = Uuid::new_v4();
        let reporter = BroadcastReporter::new(Some(run_id), tx);

        reporter.report("page 1");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, "page 1");
        assert_eq!(event.run_id, Some(run_id));
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        BroadcastReporter::new(None, tx).report("nobody listens");
    }

    #[test]
    fn test_fanout_forwards_to_all() {
        let a = Arc::new(RecordingReporter::default());
        let b = Arc::new(RecordingReporter::default());
        let fanout = FanoutReporter::new().with(a.clone()).with(b.clone());

        fanout.report("hello");

        assert_eq!(a.messages(), vec!["hello".to_string()]);
        assert_eq!(b.messages(), vec!["hello".to_string()]);
    }
}
