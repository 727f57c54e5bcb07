//! Dot-delimited path handling.
//!
//! Paths address values relative to an observer root: `"a.b.c"` for nested
//! object keys and `"items.2.name"` for array elements. Splitting goes through
//! a process-wide cache keyed by the literal path string. The cache holds at
//! most [`CACHE_CAPACITY`] entries and is cleared when it fills up.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Maximum number of distinct paths kept in the split cache.
pub const CACHE_CAPACITY: usize = 4096;

/// Split results shared by every caller that asks for the same path.
pub type Segments = Arc<[String]>;

static SPLIT_CACHE: Mutex<Option<HashMap<String, Segments>>> = Mutex::new(None);

/// Split `path` on `.`, reusing a cached result when available.
///
/// The empty path has no segments.
pub fn split(path: &str) -> Segments {
    if path.is_empty() {
        return Arc::from(Vec::new());
    }

    let mut guard = SPLIT_CACHE.lock();
    let cache = guard.get_or_insert_with(HashMap::new);
    if let Some(segments) = cache.get(path) {
        return segments.clone();
    }

    if cache.len() >= CACHE_CAPACITY {
        tracing::debug!(
            target: crate::logging::targets::OBSERVER,
            capacity = CACHE_CAPACITY,
            "path cache full, clearing"
        );
        cache.clear();
    }

    let segments: Segments = path.split('.').map(str::to_string).collect();
    cache.insert(path.to_string(), segments.clone());
    segments
}

/// Number of paths currently held in the split cache.
pub fn cache_len() -> usize {
    SPLIT_CACHE.lock().as_ref().map_or(0, HashMap::len)
}

/// Join `prefix` and `key` with a `.`, omitting the separator for an empty prefix.
pub fn join(prefix: &str, key: &str) -> String {
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{key}"),
    }
}

/// Join path segments back into a dotted path.
pub fn join_segments(segments: &[String]) -> String {
    segments.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_nested_path() {
        let segments = split("a.b.c");
        assert_eq!(&*segments, &["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_split_is_cached() {
        let first = split("cached.path.value");
        let second = split("cached.path.value");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache_len() >= 1);
    }

    #[test]
    fn test_empty_path_has_no_segments() {
        assert!(split("").is_empty());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a.b", "c"), "a.b.c");
        assert_eq!(join_segments(&["x".to_string(), "0".to_string()]), "x.0");
    }
}
