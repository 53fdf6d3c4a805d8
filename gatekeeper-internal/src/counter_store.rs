use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;

/// Storage for monotonically increasing per-key counters.
///
/// Every mutating method is atomic per key: concurrent callers on the same key
/// never observe or overwrite each other's intermediate state.
pub trait CounterStore<K>: Send + Sync {
    /// Current count for `key`, 0 if it was never incremented
    fn get(&self, key: &K) -> u32;

    /// Increment `key` unless it is already at `limit`.
    ///
    /// Returns `Ok(new_count)` when incremented and `Err(current_count)` when
    /// the key is at or above the limit, in which case nothing is written.
    fn increment_if_below(&self, key: K, limit: u32) -> Result<u32, u32>;

    /// Unconditionally increment `key`, returning the count before the increment
    fn increment(&self, key: K) -> u32;

    /// Keep only the keys for which `keep` returns true. Returns the number removed.
    fn retain(&self, keep: &dyn Fn(&K) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local counter store backed by a sharded concurrent map.
///
/// `DashMap::entry` holds the shard write lock for the duration of the
/// read-modify-write, which is what makes each increment atomic per key.
#[derive(Debug)]
pub struct InMemoryCounterStore<K: Eq + Hash> {
    counts: DashMap<K, u32>,
}

impl<K: Eq + Hash> Default for InMemoryCounterStore<K> {
    fn default() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash> InMemoryCounterStore<K> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K> CounterStore<K> for InMemoryCounterStore<K>
where
    K: Eq + Hash + Send + Sync,
{
    fn get(&self, key: &K) -> u32 {
        self.counts.get(key).map(|count| *count).unwrap_or(0)
    }

    fn increment_if_below(&self, key: K, limit: u32) -> Result<u32, u32> {
        match self.counts.entry(key) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                if *count >= limit {
                    return Err(*count);
                }
                *count += 1;
                Ok(*count)
            }
            Entry::Vacant(entry) => {
                if limit == 0 {
                    return Err(0);
                }
                entry.insert(1);
                Ok(1)
            }
        }
    }

    fn increment(&self, key: K) -> u32 {
        let mut count = self.counts.entry(key).or_insert(0);
        let previous = *count;
        *count = previous.saturating_add(1);
        previous
    }

    fn retain(&self, keep: &dyn Fn(&K) -> bool) -> usize {
        let before = self.counts.len();
        self.counts.retain(|key, _| keep(key));
        before.saturating_sub(self.counts.len())
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_if_below_stops_at_limit() {
        let store = InMemoryCounterStore::new();

        assert_eq!(store.increment_if_below("a", 2), Ok(1));
        assert_eq!(store.increment_if_below("a", 2), Ok(2));
        assert_eq!(store.increment_if_below("a", 2), Err(2));
        // Rejections do not write
        assert_eq!(store.get(&"a"), 2);
        // Other keys are independent
        assert_eq!(store.increment_if_below("b", 2), Ok(1));
    }

    #[test]
    fn test_zero_limit_never_creates_key() {
        let store = InMemoryCounterStore::new();

        assert_eq!(store.increment_if_below("a", 0), Err(0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_increment_returns_previous_count() {
        let store = InMemoryCounterStore::new();

        assert_eq!(store.get(&"a"), 0);
        assert_eq!(store.increment("a"), 0);
        assert_eq!(store.increment("a"), 1);
        assert_eq!(store.get(&"a"), 2);
    }

    #[test]
    fn test_retain_reports_removed_keys() {
        let store = InMemoryCounterStore::new();
        for key in 0..10u64 {
            store.increment(key);
        }

        let removed = store.retain(&|key: &u64| *key >= 7);
        assert_eq!(removed, 7);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&8), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut seen = Vec::with_capacity(1000);
                    for _ in 0..1000 {
                        seen.push(store.increment("shared"));
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();

        assert_eq!(all, (0..8000).collect::<Vec<u32>>());
        assert_eq!(store.get(&"shared"), 8000);
    }
}
