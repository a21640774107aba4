use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Kind of progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Started,
    Progress,
    PhaseCompleted,
    Completed,
    Partial,
    Failed,
}

impl ProgressEventType {
    /// Last event a job emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEventType::Completed | ProgressEventType::Partial | ProgressEventType::Failed
        )
    }
}

/// Pushed update about a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(
        event_type: ProgressEventType,
        job_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            job_id: job_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Per-job fan-out of progress events.
///
/// Each job gets a bounded broadcast channel created on first subscription.
/// Publishing never waits: with no subscribers the event is dropped, and a
/// lagging subscriber loses the oldest events. Closing a job drops its sender
/// so receivers observe the end of the stream. Nothing is replayed.
pub struct ProgressHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive events published for `job_id` from now on.
    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to the job's subscribers. Returns how many received it.
    pub async fn publish(&self, event: ProgressEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&event.job_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// End the job's stream.
    pub async fn close(&self, job_id: &str) {
        self.channels.write().await.remove(job_id);
    }

    /// Number of jobs with an open channel.
    pub async fn open_channels(&self) -> usize {
        self.channels.read().await.len()
    }
}
