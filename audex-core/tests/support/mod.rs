#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use audex_core::{CacheEvent, CacheOptions};

/// Source/cache tempdir pair seeded with one album: five 10-byte tracks and
/// a metadata file.
pub struct UnionHarness {
    pub source: tempfile::TempDir,
    pub cache: tempfile::TempDir,
}

impl UnionHarness {
    pub fn new() -> Self {
        let source = tempfile::tempdir().expect("source tempdir");
        let cache = tempfile::tempdir().expect("cache tempdir");
        let album = source.path().join("a");
        std::fs::create_dir_all(&album).expect("album dir");
        for name in [
            "01.flac",
            "02.flac",
            "03.flac",
            "04.flac",
            "05.flac",
            "meta.json",
        ] {
            std::fs::write(album.join(name), b"0123456789").expect("seed file");
        }
        Self { source, cache }
    }

    /// The settings the behavior scenarios run under: two siblings, a 50ms
    /// hold-open trigger, a 50% volume trigger.
    pub fn scenario_options() -> CacheOptions {
        CacheOptions {
            preload_siblings: 2,
            preload_open: Duration::from_millis(50),
            preload_read: 50,
            ..CacheOptions::default()
        }
    }

    /// Relative paths of every regular file currently in the cache, sorted.
    pub fn cached_files(&self) -> Vec<PathBuf> {
        fn visit(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    visit(root, &path, out);
                } else if path.is_file() {
                    out.push(path.strip_prefix(root).expect("under root").to_path_buf());
                }
            }
        }
        let mut files = Vec::new();
        visit(self.cache.path(), self.cache.path(), &mut files);
        files.sort();
        files
    }
}

/// Next event or panic; scenario steps should resolve well within 2s.
pub async fn next_event(rx: &mut broadcast::Receiver<CacheEvent>) -> CacheEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a cache event")
        .expect("event stream closed")
}

pub async fn collect_events(rx: &mut broadcast::Receiver<CacheEvent>, count: usize) -> Vec<CacheEvent> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(next_event(rx).await);
    }
    events
}

/// Assert the stream stays quiet for `window`. A stream whose engine has
/// shut down is quiet by definition.
pub async fn assert_no_event_for(rx: &mut broadcast::Receiver<CacheEvent>, window: Duration) {
    match tokio::time::timeout(window, rx.recv()).await {
        Err(_elapsed) => {}
        Ok(Err(broadcast::error::RecvError::Closed)) => {}
        Ok(event) => panic!("unexpected event: {:?}", event),
    }
}
