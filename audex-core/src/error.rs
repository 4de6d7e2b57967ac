use std::path::PathBuf;
use thiserror::Error;

/// Failures the cache core can surface, one variant per filesystem
/// operation so observers can tell a failed copy from a failed eviction.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("locate failed for {}: {}", .path.display(), .source)]
    LocateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("copy into cache failed for {}: {}", .path.display(), .source)]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unlink failed for {}: {}", .path.display(), .source)]
    UnlinkFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mkdir failed for {}: {}", .path.display(), .source)]
    MkdirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("utimes failed for {}: {}", .path.display(), .source)]
    UtimesFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rmdir failed for {}: {}", .path.display(), .source)]
    RmdirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory scan failed under {}: {}", .path.display(), .source)]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;
