use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use filetime::FileTime;

/// Lightweight stat result carrying exactly what the cache policy needs.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    /// Size in bytes.
    pub len: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
}

/// The filesystem primitives the core consumes, behind a seam so tests can
/// substitute their own tree. `RealFs` is the production implementation.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// lstat: does not follow symlinks.
    async fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    /// List a directory's entries as full paths, in filesystem order.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory; fails with `DirectoryNotEmpty` when occupied.
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;

    async fn set_times(
        &self,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> io::Result<()>;
}

/// Production filesystem backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        let md = tokio::fs::symlink_metadata(path).await?;
        Ok(FileStat {
            is_file: md.is_file(),
            is_dir: md.is_dir(),
            len: md.len(),
            atime: md.accessed()?,
            mtime: md.modified()?,
        })
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut rd = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        tokio::fs::copy(from, to).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir(path).await
    }

    async fn set_times(
        &self,
        path: &Path,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> io::Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            filetime::set_file_times(
                &path,
                FileTime::from_system_time(atime),
                FileTime::from_system_time(mtime),
            )
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// Resolve a virtual (mount-relative) path under a physical root. Leading
/// separators and non-normal components are stripped so the result can never
/// escape the root.
pub(crate) fn resolve_under(root: &Path, virtual_path: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    for component in virtual_path.components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

/// Inverse of [`resolve_under`]: turn a physical path below `root` back into
/// an absolute virtual path.
pub(crate) fn virtual_from(root: &Path, physical: &Path) -> Option<PathBuf> {
    let rel = physical.strip_prefix(root).ok()?;
    Some(Path::new("/").join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_leading_separators_and_dotdots() {
        let root = Path::new("/cache");
        assert_eq!(
            resolve_under(root, Path::new("/a/01.flac")),
            PathBuf::from("/cache/a/01.flac")
        );
        assert_eq!(
            resolve_under(root, Path::new("../../etc/passwd")),
            PathBuf::from("/cache/etc/passwd")
        );
    }

    #[test]
    fn virtual_round_trips() {
        let root = Path::new("/cache");
        let physical = resolve_under(root, Path::new("/a/b/03.flac"));
        assert_eq!(
            virtual_from(root, &physical),
            Some(PathBuf::from("/a/b/03.flac"))
        );
        assert_eq!(virtual_from(root, Path::new("/elsewhere/x")), None);
    }

    #[tokio::test]
    async fn real_fs_stat_and_listing() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let file = dir.path().join("track.flac");
        tokio::fs::write(&file, b"0123456789").await.unwrap();

        let fs = RealFs::new();
        let stat = fs.lstat(&file).await.unwrap();
        assert!(stat.is_file);
        assert_eq!(stat.len, 10);

        let entries = fs.read_dir(dir.path()).await.unwrap();
        assert_eq!(entries, vec![file]);
    }
}
