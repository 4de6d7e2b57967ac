use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cleaner::collect_stale;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus, PreloadReason};
use crate::fs::{FileSystem, resolve_under};
use crate::locator::PathLocator;
use crate::siblings::select_siblings;

/// One unit of background cache mutation. Items run strictly one at a time
/// in enqueue order.
#[derive(Debug)]
pub(crate) enum Job {
    Preload {
        reason: PreloadReason,
        path: PathBuf,
    },
    Clean {
        ignore: Option<Regex>,
        older_than: Duration,
    },
}

/// Cheap handle for enqueuing work from anywhere in the engine. Sends to a
/// stopped worker are dropped silently.
#[derive(Debug, Clone)]
pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorkQueue {
    pub fn enqueue(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

/// The serialized executor: a single task draining the work queue, so cache
/// mutation has one global order and a slow copy can never overlap an
/// eviction. A failing item is reported on the bus and the next item runs.
pub(crate) struct CacheWorker {
    queue: WorkQueue,
    shutdown: mpsc::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWorker").finish_non_exhaustive()
    }
}

impl CacheWorker {
    /// Spawn the executor task. Must run inside a tokio runtime.
    pub fn spawn(mutator: CacheMutator) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_queue(mutator, rx, shutdown_rx));
        Self {
            queue: WorkQueue { tx },
            shutdown: shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Stop the executor: the in-flight item drains, the backlog is
    /// discarded. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
        let handle = self.handle.lock().expect("worker handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_queue(
    mutator: CacheMutator,
    mut rx: mpsc::UnboundedReceiver<Job>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            job = rx.recv() => match job {
                Some(job) => mutator.run(job).await,
                None => break,
            },
        }
    }
    debug!("cache worker stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheOutcome {
    AlreadyCached,
    NewlyCached,
}

/// Performs the actual cache mutation for the worker: preload copies and
/// eviction. Exclusively owns writes below the cache root.
pub(crate) struct CacheMutator {
    pub fs: Arc<dyn FileSystem>,
    pub locator: Arc<PathLocator>,
    pub events: EventBus,
    pub source_root: PathBuf,
    pub cache_root: PathBuf,
    pub preload_siblings: usize,
}

impl CacheMutator {
    /// Run one work item, absorbing its failure. Errors never cross the
    /// executor boundary; they become `error` events and the queue moves on.
    async fn run(&self, job: Job) {
        let outcome = match job {
            Job::Preload { reason, path } => self.preload(reason, &path).await,
            Job::Clean { ignore, older_than } => self.clean(ignore.as_ref(), older_than).await,
        };
        if let Err(err) = outcome {
            warn!(error = %err, "cache work item failed");
            self.events.emit(CacheEvent::Error {
                message: err.to_string(),
            });
        }
    }

    /// Copy the triggered file and its next few siblings into the cache.
    async fn preload(&self, reason: PreloadReason, path: &Path) -> Result<()> {
        self.events.emit(CacheEvent::Request {
            reason,
            path: path.to_path_buf(),
        });

        let siblings = select_siblings(
            self.fs.as_ref(),
            &self.source_root,
            path,
            self.locator.filter(),
            self.preload_siblings,
        )
        .await
        .map_err(|source| CacheError::ScanFailed {
            path: path.parent().unwrap_or_else(|| Path::new("/")).to_path_buf(),
            source,
        })?;

        for sibling in siblings {
            if self.cache_one(&sibling).await? == CacheOutcome::NewlyCached {
                self.events.emit(CacheEvent::Cache(sibling));
            }
        }
        Ok(())
    }

    /// Bring one file into the cache. Idempotent: a file already cached is
    /// left alone. The copy lands under a temp name and is renamed into
    /// place, so a partial copy is never visible at the cache path.
    async fn cache_one(&self, path: &Path) -> Result<CacheOutcome> {
        let info = self.locator.locate(path).await?;
        if info.cached {
            return Ok(CacheOutcome::AlreadyCached);
        }

        let dest = resolve_under(&self.cache_root, path);
        if let Some(parent) = dest.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|source| CacheError::MkdirFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = dest.with_extension(format!("tmp.{}", Uuid::new_v4().simple()));
        self.fs
            .copy(&info.fullpath, &tmp)
            .await
            .map_err(|source| CacheError::CopyFailed {
                path: path.to_path_buf(),
                source,
            })?;

        // Timestamps mirror the source so cleaner age math reflects source
        // semantics, and are written before the rename publishes the file.
        let staged = async {
            self.fs
                .set_times(&tmp, info.stats.atime, info.stats.mtime)
                .await
                .map_err(|source| CacheError::UtimesFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
            self.fs
                .rename(&tmp, &dest)
                .await
                .map_err(|source| CacheError::CopyFailed {
                    path: path.to_path_buf(),
                    source,
                })
        };
        if let Err(err) = staged.await {
            let _ = self.fs.remove_file(&tmp).await;
            return Err(err);
        }

        self.locator.invalidate(path);
        debug!(path = %path.display(), "cached");
        Ok(CacheOutcome::NewlyCached)
    }

    /// Evict one file. The remembered locate answer is demoted before the
    /// unlink so no fresh locate can hand out the dying cache path; open
    /// descriptors keep reading the unlinked inode per Unix semantics.
    async fn uncache(&self, path: &Path) -> Result<()> {
        self.locator.demote(path);

        let cache_path = resolve_under(&self.cache_root, path);
        self.fs
            .remove_file(&cache_path)
            .await
            .map_err(|source| CacheError::UnlinkFailed {
                path: path.to_path_buf(),
                source,
            })?;
        self.prune_empty_parents(&cache_path).await?;

        self.events.emit(CacheEvent::Uncache(path.to_path_buf()));
        Ok(())
    }

    /// Remove now-empty directories upward, stopping below the cache root.
    /// ENOTEMPTY ends the walk silently; so does NotFound.
    async fn prune_empty_parents(&self, from: &Path) -> Result<()> {
        let mut dir = from.parent();
        while let Some(current) = dir {
            if current == self.cache_root || !current.starts_with(&self.cache_root) {
                break;
            }
            match self.fs.remove_dir(current).await {
                Ok(()) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                    ) =>
                {
                    break;
                }
                Err(source) => {
                    return Err(CacheError::RmdirFailed {
                        path: current.to_path_buf(),
                        source,
                    });
                }
            }
            dir = current.parent();
        }
        Ok(())
    }

    /// One sweep of the cache tree: evict regular files past their age and
    /// not protected by the ignore filter, then forget every remembered
    /// locate answer.
    async fn clean(&self, ignore: Option<&Regex>, older_than: Duration) -> Result<()> {
        let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
            return Ok(());
        };

        let stale = collect_stale(self.fs.as_ref(), &self.cache_root, ignore, cutoff)
            .await
            .map_err(|source| CacheError::ScanFailed {
                path: self.cache_root.clone(),
                source,
            })?;

        for path in stale {
            // A failed eviction leaves the file cached; the next sweep
            // retries it.
            if let Err(err) = self.uncache(&path).await {
                warn!(error = %err, "eviction failed");
                self.events.emit(CacheEvent::Error {
                    message: err.to_string(),
                });
            }
        }

        self.locator.clear();
        Ok(())
    }
}
