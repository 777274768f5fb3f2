// Weakly-held string interning, an alternative to a capacity-bounded
// intern table

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

/// Strings longer than this are returned uncached by default.
pub const LENGTH_LIMIT: usize = 38;

/// An unbounded interning cache that shrinks by itself.
///
/// Canonical values are handed out as `Arc<str>`; the map only keeps a
/// `Weak` to each one, so a canonical string dies as soon as nothing
/// outside the cache holds it. Without a garbage collector the dead map
/// entries cannot vanish on their own, so the write path sweeps them out
/// whenever it inserts, and [`size`](Self::size) counts live entries only.
pub struct StringCache {
    cache: RwLock<HashMap<Box<str>, Weak<str>>>,
    length_limit: usize,
}

impl StringCache {
    pub fn new() -> Self {
        Self::with_length_limit(LENGTH_LIMIT)
    }

    pub fn with_length_limit(length_limit: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            length_limit,
        }
    }

    /// Return the canonical instance for `value`, inserting `value` as its
    /// own representative on a miss. Values over the length limit bypass
    /// the cache entirely.
    pub fn cached_value_of(&self, value: &str) -> Arc<str> {
        if value.len() > self.length_limit {
            return Arc::from(value);
        }

        // Optimistic read under the shared lock
        {
            let cache = self.cache.read();
            if let Some(live) = cache.get(value).and_then(Weak::upgrade) {
                return live;
            }
        }

        // Miss: take the exclusive lock and re-check, another writer may
        // have inserted between the two lock acquisitions
        let mut cache = self.cache.write();
        if let Some(live) = cache.get(value).and_then(Weak::upgrade) {
            return live;
        }

        cache.retain(|_, weak| weak.strong_count() > 0);

        let canonical: Arc<str> = Arc::from(value);
        cache.insert(Box::from(value), Arc::downgrade(&canonical));
        canonical
    }

    /// Number of currently live canonical entries.
    pub fn size(&self) -> usize {
        self.cache
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern `value` in the process-wide default cache. Prefer passing an
/// explicit [`StringCache`] where one is already in scope; this exists for
/// call sites with nowhere to thread one through.
pub fn intern(value: &str) -> Arc<str> {
    static DEFAULT: OnceLock<StringCache> = OnceLock::new();
    DEFAULT.get_or_init(StringCache::new).cached_value_of(value)
}
