use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::trigger::PreloadTrigger;

/// Book-keeping for one open descriptor on a cacheable file. Non-cacheable
/// opens are never tracked.
#[derive(Debug)]
pub struct OpenFileRecord {
    /// Virtual path of the open file.
    pub path: PathBuf,
    /// Running total of successfully read bytes.
    pub bytes_read: u64,
    /// File size, learned asynchronously after open; `None` until then.
    pub size: Option<u64>,
    pub trigger: Arc<PreloadTrigger>,
}

/// Concurrent fd-to-record table. Entries live from `on_open` to
/// `on_close`; distinct descriptors never contend with each other.
#[derive(Default)]
pub struct OpenFiles {
    map: DashMap<u64, OpenFileRecord>,
}

impl fmt::Debug for OpenFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFiles")
            .field("open", &self.map.len())
            .finish()
    }
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, fd: u64, record: OpenFileRecord) {
        self.map.insert(fd, record);
    }

    pub fn remove(&self, fd: u64) -> Option<OpenFileRecord> {
        self.map.remove(&fd).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Record the size once the async locate comes back. A descriptor that
    /// already closed is simply gone; nothing to do.
    pub fn set_size(&self, fd: u64, size: u64) {
        if let Some(mut record) = self.map.get_mut(&fd) {
            record.size = Some(size);
        }
    }

    /// Accumulate read bytes and return a snapshot for the volume-trigger
    /// decision: (total read, known size, trigger handle). `None` when the
    /// descriptor is not tracked. The trigger is cloned out so the caller
    /// fires it without holding the shard lock.
    pub fn add_bytes(&self, fd: u64, bytes: u64) -> Option<(u64, Option<u64>, Arc<PreloadTrigger>)> {
        let mut record = self.map.get_mut(&fd)?;
        record.bytes_read = record.bytes_read.saturating_add(bytes);
        Some((record.bytes_read, record.size, record.trigger.clone()))
    }
}
