//! Per-job progress streams.
//!
//! Each job gets at most one live listener, fed through a bounded channel.
//! Sends never block a worker: with no listener, or a listener that cannot
//! keep up, events are dropped. The producer closes the channel on terminal
//! events; a listener disconnecting never affects the job.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffered events per subscriber before drop-on-full kicks in.
const CHANNEL_CAPACITY: usize = 64;

/// Lifecycle event kinds, in the order a healthy job emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
}

/// One discrete lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>, percent: Option<u8>) -> Self {
        Self {
            kind,
            message: message.into(),
            percent,
            timestamp: Utc::now(),
        }
    }

    /// Render as one line-delimited JSON object, the wire format of the
    /// server-push progress interface.
    pub fn to_json_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Fan-out point for job progress, keyed by job id.
#[derive(Default)]
pub struct ProgressHub {
    channels: RwLock<HashMap<String, mpsc::Sender<ProgressEvent>>>,
    /// Ids whose stream already ended with a terminal event. Subscribing to
    /// one of these yields a stream that ends immediately instead of a
    /// sender nothing will ever close. Lock order is channels before closed.
    closed: RwLock<HashSet<String>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener to a job's stream.
    ///
    /// Only one live listener per job: subscribing again replaces the
    /// previous subscription, whose stream ends. Subscribing after the job's
    /// terminal event returns a stream that ends immediately.
    pub fn subscribe(&self, job_id: &str) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut channels = self.channels.write().expect("progress lock poisoned");
        if self
            .closed
            .read()
            .expect("progress lock poisoned")
            .contains(job_id)
        {
            // tx drops here, so the returned stream ends on first poll.
            return ReceiverStream::new(rx);
        }
        channels.insert(job_id.to_string(), tx);
        ReceiverStream::new(rx)
    }

    /// Push an event to a job's listener, if any. Best-effort: dropped when
    /// no listener is attached or its buffer is full.
    pub fn emit(&self, job_id: &str, event: ProgressEvent) {
        let channels = self.channels.read().expect("progress lock poisoned");
        if let Some(tx) = channels.get(job_id) {
            if let Err(e) = tx.try_send(event) {
                tracing::trace!(job_id, error = %e, "Dropped progress event");
            }
        }
    }

    /// Close a job's stream after a terminal event. No further events are
    /// delivered; the listener's stream ends, and any later subscription for
    /// this id ends immediately.
    pub fn close(&self, job_id: &str) {
        let mut channels = self.channels.write().expect("progress lock poisoned");
        channels.remove(job_id);
        self.closed
            .write()
            .expect("progress lock poisoned")
            .insert(job_id.to_string());
    }
}
