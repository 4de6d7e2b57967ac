use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use regex::Regex;

use crate::fs::{FileSystem, virtual_from};

/// Walk the cache tree once and pick the files due for eviction: regular
/// files whose basename is not protected by `ignore` and whose access time
/// predates `cutoff`. Results are virtual paths in walk order (directories
/// sorted, depth-first), each eligible file considered exactly once.
///
/// A cache root that does not exist yet is an empty cache, not an error.
pub(crate) async fn collect_stale(
    fs: &dyn FileSystem,
    cache_root: &Path,
    ignore: Option<&Regex>,
    cutoff: SystemTime,
) -> io::Result<Vec<PathBuf>> {
    match fs.lstat(cache_root).await {
        Ok(stat) if stat.is_dir => {}
        Ok(_) => return Ok(Vec::new()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    }

    let mut stale = Vec::new();
    walk(fs, cache_root, cache_root, ignore, cutoff, &mut stale).await?;
    Ok(stale)
}

fn walk<'a>(
    fs: &'a dyn FileSystem,
    cache_root: &'a Path,
    dir: &'a Path,
    ignore: Option<&'a Regex>,
    cutoff: SystemTime,
    stale: &'a mut Vec<PathBuf>,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs.read_dir(dir).await?;
        entries.sort_unstable();
        for entry in entries {
            let stat = fs.lstat(&entry).await?;
            if stat.is_dir {
                walk(fs, cache_root, &entry, ignore, cutoff, stale).await?;
            } else if stat.is_file {
                let name = entry
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let protected = ignore.map(|re| re.is_match(&name)).unwrap_or(false);
                if !protected && stat.atime < cutoff {
                    if let Some(path) = virtual_from(cache_root, &entry) {
                        stale.push(path);
                    }
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;
    use filetime::FileTime;
    use std::time::Duration;

    fn backdate(path: &Path, by: Duration) {
        let then = FileTime::from_system_time(SystemTime::now() - by);
        filetime::set_file_times(path, then, then).unwrap();
    }

    #[tokio::test]
    async fn picks_old_files_and_skips_protected_ones() {
        let cache = tempfile::tempdir().unwrap();
        let album = cache.path().join("a");
        std::fs::create_dir_all(&album).unwrap();
        for name in ["01.flac", "02.flac", "03.flac"] {
            std::fs::write(album.join(name), b"x").unwrap();
        }
        backdate(&album.join("01.flac"), Duration::from_secs(3600));
        backdate(&album.join("02.flac"), Duration::from_secs(3600));
        // 03.flac stays fresh.

        let ignore = Regex::new(r"01\.flac$").unwrap();
        let cutoff = SystemTime::now() - Duration::from_secs(60);
        let stale = collect_stale(&RealFs::new(), cache.path(), Some(&ignore), cutoff)
            .await
            .unwrap();
        assert_eq!(stale, vec![PathBuf::from("/a/02.flac")]);
    }

    #[tokio::test]
    async fn walks_nested_directories_in_order() {
        let cache = tempfile::tempdir().unwrap();
        for dir in ["a", "b"] {
            std::fs::create_dir_all(cache.path().join(dir)).unwrap();
        }
        std::fs::write(cache.path().join("a/02.flac"), b"x").unwrap();
        std::fs::write(cache.path().join("b/01.flac"), b"x").unwrap();
        backdate(&cache.path().join("a/02.flac"), Duration::from_secs(600));
        backdate(&cache.path().join("b/01.flac"), Duration::from_secs(600));

        let cutoff = SystemTime::now() - Duration::from_secs(60);
        let stale = collect_stale(&RealFs::new(), cache.path(), None, cutoff)
            .await
            .unwrap();
        assert_eq!(
            stale,
            vec![PathBuf::from("/a/02.flac"), PathBuf::from("/b/01.flac")]
        );
    }

    #[tokio::test]
    async fn missing_cache_root_is_an_empty_cache() {
        let cache = tempfile::tempdir().unwrap();
        let gone = cache.path().join("never-created");
        let stale = collect_stale(&RealFs::new(), &gone, None, SystemTime::now())
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
