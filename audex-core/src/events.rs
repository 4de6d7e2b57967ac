use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

/// Why a preload trigger resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadReason {
    /// The file stayed open past the configured hold time.
    Time,
    /// Enough of the file was read to cross the volume threshold.
    Read,
}

impl PreloadReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for PreloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine tells the outside world. Paths are virtual
/// (mount-relative); consumers resolve them however they like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A cacheable file was opened and a cache copy already existed.
    Hit(PathBuf),
    /// A cacheable file was opened with no cache copy present.
    Miss(PathBuf),
    /// A non-cacheable file was opened; the engine will not track it.
    Read(PathBuf),
    /// A preload trigger fired and work was queued.
    Request { reason: PreloadReason, path: PathBuf },
    /// A file was newly copied into the cache.
    Cache(PathBuf),
    /// A file was evicted from the cache.
    Uncache(PathBuf),
    /// A background work item failed; the queue keeps going.
    Error { message: String },
}

impl CacheEvent {
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss(_) => "miss",
            Self::Read(_) => "read",
            Self::Request { .. } => "request",
            Self::Cache(_) => "cache",
            Self::Uncache(_) => "uncache",
            Self::Error { .. } => "error",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit(path)
            | Self::Miss(path)
            | Self::Read(path)
            | Self::Cache(path)
            | Self::Uncache(path) => {
                write!(f, "{} {}", self.event_name(), path.display())
            }
            Self::Request { reason, path } => {
                write!(f, "request [{reason}, {}]", path.display())
            }
            Self::Error { message } => write!(f, "error {message}"),
        }
    }
}

/// In-process fan-out of engine notifications. Delivery is synchronous with
/// respect to the emitter; observers that lag past the channel capacity lose
/// the oldest events instead of blocking cache work.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
    capacity: usize,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Emit to every current subscriber. An event with no listeners is
    /// dropped silently.
    pub fn emit(&self, event: CacheEvent) {
        tracing::debug!(event = %event, "cache event");
        let _ = self.sender.send(event);
    }
}
