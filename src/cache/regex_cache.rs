use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::pattern::anchored_regex;

/// Thread-safe LRU cache of compiled attribute regexes.
///
/// Keyed by the source pattern. Compile failures are cached as `None` so a
/// broken pattern is not recompiled on every score.
pub struct RegexCache {
    cache: Mutex<LruCache<String, Option<Regex>>>,
}

impl RegexCache {
    /// Create a cache holding at most `capacity` compiled patterns (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Compiled, start-anchored regex for `pattern`, or `None` if it doesn't compile.
    pub fn get(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(compiled) = cache.get(pattern) {
            return compiled.clone();
        }
        let compiled = match anchored_regex(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("Attribute regex {:?} does not compile: {}", pattern, e);
                None
            }
        };
        cache.put(pattern.to_string(), compiled.clone());
        compiled
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiles_once() {
        let cache = RegexCache::new(4);
        assert!(cache.is_empty());
        let re = cache.get(r"\d+").unwrap();
        assert!(re.is_match("42abc"));
        assert!(cache.get(r"\d+").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_cached_as_none() {
        let cache = RegexCache::new(4);
        assert!(cache.get("(broken").is_none());
        assert!(cache.get("(broken").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction() {
        let cache = RegexCache::new(2);
        cache.get("a");
        cache.get("b");
        cache.get("c");
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
