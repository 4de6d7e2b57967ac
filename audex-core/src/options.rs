use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

/// Basenames eligible for preloading when no filter is configured.
static DEFAULT_PRELOAD_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*\.flac$").expect("default preload filter"));

/// Tuning knobs for the cache engine. The surrounding CLI builds one of
/// these from its arguments and hands it over at construction; the engine
/// never reloads configuration at runtime.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// How many lexical siblings to copy alongside a triggered file.
    pub preload_siblings: usize,

    /// Basename filter deciding which files participate in caching at all.
    pub preload_filter: Regex,

    /// Percentage of a file that must be read to fire the volume trigger.
    /// `0` fires on the first byte; `100` only after the whole file.
    pub preload_read: u8,

    /// How long a file must stay open before the time trigger fires.
    pub preload_open: Duration,

    /// Cached files untouched for longer than this are eligible for
    /// eviction.
    pub clean_after: Duration,

    /// Basenames the cleaner always keeps (e.g. `01\.flac$` to pin first
    /// tracks).
    pub clean_ignore: Option<Regex>,

    /// How often the background cleaner sweeps the cache tree.
    pub clean_interval: Duration,

    /// Bound on the recent-path lookup cache.
    pub mru_size: usize,

    /// Buffer size of the broadcast event channel; slow observers drop old
    /// events rather than blocking the engine.
    pub event_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            preload_siblings: 3,
            preload_filter: DEFAULT_PRELOAD_FILTER.clone(),
            preload_read: 50,
            preload_open: Duration::from_millis(2000),
            clean_after: Duration::from_secs(6 * 3600),
            clean_ignore: None,
            clean_interval: Duration::from_secs(600),
            mru_size: 10,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_matches_flac_only() {
        let options = CacheOptions::default();
        assert!(options.preload_filter.is_match("01.flac"));
        assert!(!options.preload_filter.is_match("cover.jpg"));
        assert!(!options.preload_filter.is_match("01.flac.part"));
    }
}
