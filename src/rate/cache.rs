//! Reaction Rate Cache
//!
//! Fixed-capacity cache of flux-folded scalar reaction rates, one instance
//! per flux spectrum. Two dovetailed structures: a kza-sorted fixed array
//! for O(log C) lookup, and a doubly-linked recency list over an entry arena
//! for O(1) LRU eviction and MRU promotion. Each entry carries its current
//! index in the sorted array so the two sides stay in step.
//!
//! A full cache always accepts an insert by evicting the least recently
//! used base nuclide; that is the designed steady state, not an error.

/// Sorted-array slot value marking a free position; larger than any real kza
const BLANK_KZA: u32 = 9_999_999;

/// Rate slot value marking "not yet computed"; rates are never negative
const MISSING: f64 = -1.0;

#[derive(Debug, Clone, Copy)]
struct SortedSlot {
    kza: u32,
    entry: usize,
}

#[derive(Debug)]
struct Entry {
    kza: u32,
    /// back-index into the sorted array
    sorted_idx: usize,
    rates: Vec<f64>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU + kza-sorted cache of scalar reaction rates
#[derive(Debug)]
pub struct RateCache {
    sorted: Vec<SortedSlot>,
    entries: Vec<Entry>,
    /// least recently used entry (eviction side)
    oldest: Option<usize>,
    /// most recently used entry
    newest: Option<usize>,
}

impl RateCache {
    /// Create a cache holding at most `capacity` base nuclides
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rate cache capacity must be positive");
        RateCache {
            sorted: vec![
                SortedSlot {
                    kza: BLANK_KZA,
                    entry: usize::MAX,
                };
                capacity
            ],
            entries: Vec::with_capacity(capacity),
            oldest: None,
            newest: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.sorted.len()
    }

    /// Number of base nuclides currently cached
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a cached rate; a hit promotes the entry to most recently used.
    pub fn read(&mut self, kza: u32, channel: usize) -> Option<f64> {
        let entry = self.search(kza)?;
        self.promote(entry);
        let rate = self.entries[entry].rates.get(channel).copied()?;
        if rate < 0.0 {
            None
        } else {
            Some(rate)
        }
    }

    /// Insert or update a rate. On first insert for a kza the rate vector is
    /// sized to `channels_total`; when the cache is full the LRU entry is
    /// evicted to make room.
    pub fn set(&mut self, kza: u32, channels_total: usize, channel: usize, rate: f64) {
        let entry = match self.search(kza) {
            Some(entry) => entry,
            None => self.add(kza, channels_total),
        };
        if channel < self.entries[entry].rates.len() {
            self.entries[entry].rates[channel] = rate;
        }
    }

    /// Binary search the sorted array for a kza.
    fn search(&self, kza: u32) -> Option<usize> {
        self.sorted
            .binary_search_by(|slot| slot.kza.cmp(&kza))
            .ok()
            .map(|idx| self.sorted[idx].entry)
    }

    /// Detach an entry from the recency list.
    fn unlink(&mut self, entry: usize) {
        let (prev, next) = (self.entries[entry].prev, self.entries[entry].next);
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.oldest = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.newest = prev,
        }
        self.entries[entry].prev = None;
        self.entries[entry].next = None;
    }

    /// Append an entry at the most-recently-used end.
    fn push_newest(&mut self, entry: usize) {
        self.entries[entry].prev = self.newest;
        self.entries[entry].next = None;
        match self.newest {
            Some(tail) => self.entries[tail].next = Some(entry),
            None => self.oldest = Some(entry),
        }
        self.newest = Some(entry);
    }

    fn promote(&mut self, entry: usize) {
        if self.newest != Some(entry) {
            self.unlink(entry);
            self.push_newest(entry);
        }
    }

    /// Create (or recycle) an entry for a new kza and bubble it into the
    /// sorted array, keeping back-indices current.
    fn add(&mut self, kza: u32, channels_total: usize) -> usize {
        let capacity = self.capacity();
        let (entry, mut idx) = if self.entries.len() < capacity {
            // first free sorted slot sits past all live kzas
            let idx = self
                .sorted
                .iter()
                .position(|slot| slot.kza == BLANK_KZA)
                .unwrap_or(capacity - 1);
            self.entries.push(Entry {
                kza,
                sorted_idx: idx,
                rates: vec![MISSING; channels_total],
                prev: None,
                next: None,
            });
            (self.entries.len() - 1, idx)
        } else {
            // cache full: evict the least recently used entry in place
            let victim = self.oldest.expect("full cache has an oldest entry");
            self.unlink(victim);
            let idx = self.entries[victim].sorted_idx;
            self.entries[victim].kza = kza;
            self.entries[victim].rates.clear();
            self.entries[victim].rates.resize(channels_total, MISSING);
            (victim, idx)
        };
        self.push_newest(entry);

        // bubble toward the correct sorted position
        while idx + 1 < capacity && kza > self.sorted[idx + 1].kza {
            self.sorted[idx] = self.sorted[idx + 1];
            self.entries[self.sorted[idx].entry].sorted_idx = idx;
            idx += 1;
        }
        while idx > 0 && kza < self.sorted[idx - 1].kza {
            self.sorted[idx] = self.sorted[idx - 1];
            self.entries[self.sorted[idx].entry].sorted_idx = idx;
            idx -= 1;
        }
        self.sorted[idx] = SortedSlot { kza, entry };
        self.entries[entry].sorted_idx = idx;
        entry
    }

    /// Distinct kzas from least to most recently used (test/diagnostic view)
    pub fn recency_order(&self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.entries.len());
        let mut cursor = self.oldest;
        while let Some(entry) = cursor {
            order.push(self.entries[entry].kza);
            cursor = self.entries[entry].next;
        }
        order
    }

    /// Live kzas in sorted-array order (test/diagnostic view)
    pub fn sorted_kzas(&self) -> Vec<u32> {
        self.sorted
            .iter()
            .filter(|slot| slot.kza != BLANK_KZA)
            .map(|slot| slot.kza)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_miss_then_hit() {
        let mut cache = RateCache::new(4);
        assert_eq!(cache.read(260560, 0), None);

        cache.set(260560, 3, 0, 1.5);
        assert_eq!(cache.read(260560, 0), Some(1.5));
        // other channels of the same kza are allocated but missing
        assert_eq!(cache.read(260560, 1), None);
        assert_eq!(cache.read(260560, 2), None);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = RateCache::new(2);
        cache.set(100, 1, 0, 1.0);
        cache.set(200, 1, 0, 2.0);
        // touch 100 so 200 becomes the eviction candidate
        assert_eq!(cache.read(100, 0), Some(1.0));
        cache.set(300, 1, 0, 3.0);

        assert_eq!(cache.read(200, 0), None);
        assert_eq!(cache.read(100, 0), Some(1.0));
        assert_eq!(cache.read(300, 0), Some(3.0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sorted_invariant_under_churn() {
        let mut cache = RateCache::new(8);
        for kza in [500u32, 100, 900, 300, 700, 200, 800, 400, 600, 50] {
            cache.set(kza, 2, 0, f64::from(kza));
            let sorted = cache.sorted_kzas();
            let mut expect = sorted.clone();
            expect.sort_unstable();
            assert_eq!(sorted, expect);
            assert!(sorted.len() <= 8);
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_recency_order_tracks_access() {
        let mut cache = RateCache::new(4);
        cache.set(10, 1, 0, 1.0);
        cache.set(20, 1, 0, 2.0);
        cache.set(30, 1, 0, 3.0);
        cache.read(10, 0);
        assert_eq!(cache.recency_order(), vec![20, 30, 10]);
    }

    #[test]
    fn test_set_updates_existing_channel() {
        let mut cache = RateCache::new(2);
        cache.set(10, 2, 0, 1.0);
        cache.set(10, 2, 1, 2.0);
        assert_eq!(cache.read(10, 0), Some(1.0));
        assert_eq!(cache.read(10, 1), Some(2.0));
        assert_eq!(cache.len(), 1);
    }
}
