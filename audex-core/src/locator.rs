use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use regex::Regex;

use crate::error::{CacheError, Result};
use crate::fs::{FileStat, FileSystem, resolve_under};

/// Where a virtual path currently resolves, and what lives there.
#[derive(Debug, Clone)]
pub struct PathInfo {
    /// Virtual path relative to the mount.
    pub path: PathBuf,
    /// Resolved physical path, under the cache root or the source root.
    pub fullpath: PathBuf,
    /// True iff a physical file exists at the cache location.
    pub cached: bool,
    /// True iff the basename passes the preload filter.
    pub cacheable: bool,
    pub stats: FileStat,
}

/// Resolves virtual paths against the cache-over-source union and remembers
/// recent answers in a small bounded MRU, so a getattr-then-open pair costs
/// one stat instead of two. Only positive results are remembered; a failed
/// locate is never cached.
pub struct PathLocator {
    fs: Arc<dyn FileSystem>,
    source_root: PathBuf,
    cache_root: PathBuf,
    preload_filter: Regex,
    recent: Mutex<LruCache<PathBuf, PathInfo>>,
}

impl fmt::Debug for PathLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLocator")
            .field("source_root", &self.source_root)
            .field("cache_root", &self.cache_root)
            .field("recent_entries", &self.recent().len())
            .finish()
    }
}

impl PathLocator {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        source_root: PathBuf,
        cache_root: PathBuf,
        preload_filter: Regex,
        mru_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(mru_size.max(1)).expect("non-zero MRU size");
        Self {
            fs,
            source_root,
            cache_root,
            preload_filter,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn recent(&self) -> MutexGuard<'_, LruCache<PathBuf, PathInfo>> {
        self.recent.lock().expect("recent-path cache lock")
    }

    /// Whether the basename participates in caching at all.
    pub fn is_cacheable(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.preload_filter.is_match(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Resolve a virtual path. Prefers the cache copy; falls through to the
    /// source when the cache location is absent. Any other stat failure, or
    /// a source miss, surfaces as [`CacheError::LocateFailed`].
    pub async fn locate(&self, path: &Path) -> Result<PathInfo> {
        if let Some(info) = self.recent().get(path) {
            return Ok(info.clone());
        }

        let cacheable = self.is_cacheable(path);
        let cache_path = resolve_under(&self.cache_root, path);
        let info = match self.fs.lstat(&cache_path).await {
            Ok(stats) => PathInfo {
                path: path.to_path_buf(),
                fullpath: cache_path,
                cached: true,
                cacheable,
                stats,
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let source_path = resolve_under(&self.source_root, path);
                let stats = self.fs.lstat(&source_path).await.map_err(|source| {
                    CacheError::LocateFailed {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                PathInfo {
                    path: path.to_path_buf(),
                    fullpath: source_path,
                    cached: false,
                    cacheable,
                    stats,
                }
            }
            Err(source) => {
                return Err(CacheError::LocateFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        self.recent().put(path.to_path_buf(), info.clone());
        Ok(info)
    }

    /// Drop the remembered answer for one path.
    pub fn invalidate(&self, path: &Path) {
        self.recent().pop(path);
    }

    /// Drop every remembered answer.
    pub fn clear(&self) {
        self.recent().clear();
    }

    /// Point a remembered entry back at the source before its cache copy is
    /// unlinked, so a locate racing the eviction never hands out a dead
    /// cache path.
    pub fn demote(&self, path: &Path) {
        let source_path = resolve_under(&self.source_root, path);
        if let Some(info) = self.recent().get_mut(path) {
            info.cached = false;
            info.fullpath = source_path;
        }
    }

    pub(crate) fn filter(&self) -> &Regex {
        &self.preload_filter
    }
}
