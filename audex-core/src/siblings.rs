use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::fs::{FileSystem, resolve_under};

/// The preload set for a triggered file: itself plus the next `count`
/// basename-ordered siblings that pass the filter. Album tracks are named
/// `01.flac, 02.flac, …`, so the lexical successors are exactly the tracks
/// the listener will want next.
///
/// Returns an empty set when the triggered basename is no longer present in
/// the source listing (the file vanished between trigger and scan).
pub async fn select_siblings(
    fs: &dyn FileSystem,
    source_root: &Path,
    path: &Path,
    filter: &Regex,
    count: usize,
) -> io::Result<Vec<PathBuf>> {
    let Some(basename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("/"));

    let entries = fs.read_dir(&resolve_under(source_root, parent)).await?;
    let mut names: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| filter.is_match(name))
        .collect();
    names.sort_unstable();

    let Some(index) = names.iter().position(|name| *name == basename) else {
        return Ok(Vec::new());
    };

    let end = names.len().min(index + count + 1);
    Ok(names[index..end]
        .iter()
        .map(|name| parent.join(name))
        .collect())
}
