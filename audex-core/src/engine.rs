use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus, PreloadReason};
use crate::fs::{FileSystem, RealFs, resolve_under};
use crate::locator::{PathInfo, PathLocator};
use crate::options::CacheOptions;
use crate::tracker::{OpenFileRecord, OpenFiles};
use crate::trigger::{PreloadTrigger, TriggerState};
use crate::worker::{CacheMutator, CacheWorker, Job, WorkQueue};

/// The cache policy engine. The VFS adapter reports opens, reads, and
/// closes here; the engine decides what to preload and what to evict, and
/// narrates its decisions on the event stream.
///
/// One instance owns the MRU, the open-file table, and the serialized
/// mutation queue; nothing is shared through globals.
pub struct CacheEngine {
    options: CacheOptions,
    source_root: PathBuf,
    fs: Arc<dyn FileSystem>,
    locator: Arc<PathLocator>,
    open_files: OpenFiles,
    worker: CacheWorker,
    queue: WorkQueue,
    events: EventBus,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("source_root", &self.source_root)
            .field("open_files", &self.open_files)
            .field("locator", &self.locator)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// Build an engine over the real filesystem and spawn its mutation
    /// queue. Must be called inside a tokio runtime.
    pub fn new(
        source_root: impl Into<PathBuf>,
        cache_root: impl Into<PathBuf>,
        options: CacheOptions,
    ) -> Arc<Self> {
        Self::with_fs(source_root, cache_root, options, Arc::new(RealFs::new()))
    }

    /// As [`CacheEngine::new`], with a substitute filesystem seam.
    pub fn with_fs(
        source_root: impl Into<PathBuf>,
        cache_root: impl Into<PathBuf>,
        options: CacheOptions,
        fs: Arc<dyn FileSystem>,
    ) -> Arc<Self> {
        let source_root = source_root.into();
        let cache_root = cache_root.into();

        let events = EventBus::new(options.event_capacity);
        let locator = Arc::new(PathLocator::new(
            fs.clone(),
            source_root.clone(),
            cache_root.clone(),
            options.preload_filter.clone(),
            options.mru_size,
        ));
        let worker = CacheWorker::spawn(CacheMutator {
            fs: fs.clone(),
            locator: locator.clone(),
            events: events.clone(),
            source_root: source_root.clone(),
            cache_root,
            preload_siblings: options.preload_siblings,
        });
        let queue = worker.queue();

        info!(source = %source_root.display(), "cache engine up");
        Arc::new(Self {
            options,
            source_root,
            fs,
            locator,
            open_files: OpenFiles::new(),
            worker,
            queue,
            events,
            cleaner: Mutex::new(None),
        })
    }

    /// Attach an observer to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Resolve a virtual path for the adapter's getattr/open routing.
    pub async fn locate(&self, path: &Path) -> Result<PathInfo> {
        self.locator.locate(path).await
    }

    /// A descriptor was opened. Non-cacheable files get a `read` event and
    /// no tracking. Cacheable files get a `hit`/`miss`, an open-duration
    /// trigger, and an async size fetch for the volume trigger.
    pub async fn on_open(self: &Arc<Self>, fd: u64, path: &Path) -> Result<()> {
        if !self.locator.is_cacheable(path) {
            self.events.emit(CacheEvent::Read(path.to_path_buf()));
            return Ok(());
        }

        let info = self.locator.locate(path).await?;
        self.events.emit(if info.cached {
            CacheEvent::Hit(path.to_path_buf())
        } else {
            CacheEvent::Miss(path.to_path_buf())
        });

        let trigger = PreloadTrigger::fire_after(self.options.preload_open, PreloadReason::Time);

        // Continuation: any fire becomes a queued preload. The request
        // outlives the descriptor; only a cancel suppresses it.
        {
            let trigger = trigger.clone();
            let queue = self.queue.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move {
                if let TriggerState::Fired(reason) = trigger.resolved().await {
                    queue.enqueue(Job::Preload { reason, path });
                }
            });
        }

        self.open_files.insert(
            fd,
            OpenFileRecord {
                path: path.to_path_buf(),
                bytes_read: 0,
                size: None,
                trigger,
            },
        );

        // Size fetch stays off the open path; until it lands the volume
        // trigger simply cannot fire.
        {
            let engine = self.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move {
                if let Ok(info) = engine.locator.locate(&path).await {
                    engine.open_files.set_size(fd, info.stats.len);
                }
            });
        }

        Ok(())
    }

    /// A read completed on the descriptor. Crossing the configured fraction
    /// of the file fires the volume trigger; repeats are absorbed by the
    /// latch.
    pub fn on_read(&self, fd: u64, bytes: u64) {
        let Some((bytes_read, size, trigger)) = self.open_files.add_bytes(fd, bytes) else {
            return;
        };
        let Some(size) = size else { return };

        let threshold = u128::from(size) * u128::from(self.options.preload_read);
        if u128::from(bytes_read) * 100 > threshold && trigger.fire(PreloadReason::Read) {
            debug!(fd, bytes_read, size, "volume trigger fired");
        }
    }

    /// The descriptor closed. An armed trigger is cancelled; one that
    /// already fired has its preload queued regardless.
    pub fn on_close(&self, fd: u64) {
        if let Some(record) = self.open_files.remove(fd) {
            record.trigger.cancel();
        }
    }

    /// Union directory listing; the source tree is authoritative.
    pub async fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        let dir = resolve_under(&self.source_root, path);
        let entries =
            self.fs
                .read_dir(&dir)
                .await
                .map_err(|source| CacheError::ScanFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort_unstable();
        Ok(names)
    }

    /// Queue a sweep with the configured ignore filter and age.
    pub fn request_clean(&self) {
        self.request_clean_with(
            self.options.clean_ignore.clone(),
            self.options.clean_after,
        );
    }

    /// Queue a sweep with explicit parameters (the CLI's signal handler
    /// uses this for ad-hoc cleans).
    pub fn request_clean_with(&self, ignore: Option<Regex>, older_than: Duration) {
        self.queue.enqueue(Job::Clean { ignore, older_than });
    }

    /// Start the periodic sweeper. Subsequent calls are no-ops until
    /// shutdown.
    pub fn start_cleaner(self: &Arc<Self>) {
        let mut slot = self.cleaner.lock().expect("cleaner handle lock");
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.options.clean_interval.max(Duration::from_millis(1));
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(engine) => engine.request_clean(),
                    None => break,
                }
            }
        }));
    }

    /// Number of descriptors currently tracked.
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    /// Stop the cleaner and the mutation queue. The in-flight work item
    /// drains; queued items are discarded. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(cleaner) = self.cleaner.lock().expect("cleaner handle lock").take() {
            cleaner.abort();
        }
        self.worker.shutdown().await;
        info!("cache engine stopped");
    }
}
