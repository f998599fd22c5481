//! Status event channel for encoder and session activity.
//!
//! Events flow from the supervisor and coordinator to any number of
//! subscribers (the SSE endpoint, the coordinator's watcher task, tests)
//! over a `tokio::sync::broadcast` channel. Emission never blocks: with no
//! subscribers the event is dropped, and a slow subscriber whose buffer
//! overflows loses the oldest events (the channel's lagged semantics).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// Current time as unix milliseconds, for event timestamps.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Default per-subscriber buffer capacity when none is configured.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A status event describing encoder or session activity.
///
/// Every variant carries the emission timestamp in unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The encoder process was spawned.
    Started { pid: Option<u32>, timestamp_unix_ms: u64 },
    /// A raw stderr line from the encoder, forwarded verbatim.
    LogLine { line: String, timestamp_unix_ms: u64 },
    /// The encoder reported frame progress.
    Encoding { message: String, timestamp_unix_ms: u64 },
    /// The ingest endpoint accepted stream data.
    StreamAccepted { message: String, timestamp_unix_ms: u64 },
    /// A crash restart (or live-transition retry) is about to happen.
    Retrying { attempt: u32, max: u32, timestamp_unix_ms: u64 },
    /// An error was observed; terminal when retries are exhausted.
    Error { message: String, timestamp_unix_ms: u64 },
    /// The encoder process exited.
    Stopped { exit_code: Option<i32>, timestamp_unix_ms: u64 },
}

impl StatusEvent {
    /// Short label for the variant, used in log output.
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEvent::Started { .. } => "started",
            StatusEvent::LogLine { .. } => "log_line",
            StatusEvent::Encoding { .. } => "encoding",
            StatusEvent::StreamAccepted { .. } => "stream_accepted",
            StatusEvent::Retrying { .. } => "retrying",
            StatusEvent::Error { .. } => "error",
            StatusEvent::Stopped { .. } => "stopped",
        }
    }
}

/// Broadcast channel for [`StatusEvent`]s.
///
/// Cloning the bus clones the sender; all clones feed the same set of
/// subscribers. Subscription is forward-only: a new receiver sees no history.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it; zero when nobody
    /// is listening, which is not an error.
    pub fn emit(&self, event: StatusEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
