// Notification bus
// Every material job/pipeline transition is published here.
// Publishing is fire-and-forget: no subscriber, lagging subscribers and
// dropped receivers never affect the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::application::constants::EVENT_BUS_CAPACITY;
use crate::domain::JobSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

/// Named event with a JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Notification {
    JobSave(JobSnapshot),
    JobUpdate(JobSnapshot),
    JobClear(JobSnapshot),
    JobProgress {
        job: String,
        progress: f64,
    },
    StartDownload {
        channel: String,
        capture_id: String,
    },
    StartCapture {
        channel: String,
        recording: String,
        attempt: u32,
    },
    EndCapture {
        channel: String,
        recording: String,
        success: bool,
    },
    StartConvert {
        channel: String,
        recording: String,
    },
    EndConvert {
        channel: String,
        recording: String,
        success: bool,
    },
    EndDownload {
        channel: String,
        recording: String,
    },
    ChannelOffline {
        channel: String,
    },
    Alert {
        level: AlertLevel,
        title: String,
        message: String,
    },
}

impl Notification {
    /// Event name as seen by subscribers
    pub fn action(&self) -> &'static str {
        match self {
            Notification::JobSave(_) => "job_save",
            Notification::JobUpdate(_) => "job_update",
            Notification::JobClear(_) => "job_clear",
            Notification::JobProgress { .. } => "job_progress",
            Notification::StartDownload { .. } => "start_download",
            Notification::StartCapture { .. } => "start_capture",
            Notification::EndCapture { .. } => "end_capture",
            Notification::StartConvert { .. } => "start_convert",
            Notification::EndConvert { .. } => "end_convert",
            Notification::EndDownload { .. } => "end_download",
            Notification::ChannelOffline { .. } => "channel_offline",
            Notification::Alert { .. } => "alert",
        }
    }
}

/// Publish/subscribe hub. Dropping a receiver unsubscribes it.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        trace!(action = notification.action(), "Publishing notification");
        let _ = self.tx.send(notification);
    }

    pub fn alert(&self, level: AlertLevel, title: impl Into<String>, message: impl Into<String>) {
        self.publish(Notification::Alert {
            level,
            title: title.into(),
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
