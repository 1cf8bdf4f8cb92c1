//! The GID-ordered concurrent object store.
//!
//! A [`GidMap`] keys records by GID and hands out `Arc` handles, so readers
//! keep objects alive across lock boundaries. Iteration is a re-locking
//! cursor: each step takes the read lock just long enough to find the next
//! entry, which lets insertions and iteration proceed concurrently without
//! ever invalidating the cursor.
//!
//! Logical deletion happens through deltas on the records; only the GC
//! physically removes entries.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use quiver_common::types::Gid;

/// A concurrent map from GID to record, iterable in GID order.
pub struct GidMap<T> {
    entries: RwLock<BTreeMap<Gid, Arc<T>>>,
    next_gid: AtomicU64,
}

impl<T> GidMap<T> {
    /// Creates an empty map whose first allocated GID is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_gid: AtomicU64::new(1),
        }
    }

    /// Allocates the next GID from the per-kind counter.
    pub fn allocate_gid(&self) -> Gid {
        Gid::new(self.next_gid.fetch_add(1, Ordering::Relaxed))
    }

    /// Seeds the counter so the next allocation returns `next`.
    ///
    /// Used at recovery with `max(existing) + 1`. Never moves backwards.
    pub fn seed_next_gid(&self, next: u64) {
        self.next_gid.fetch_max(next, Ordering::Relaxed);
    }

    /// The value the next allocation would return.
    #[must_use]
    pub fn peek_next_gid(&self) -> u64 {
        self.next_gid.load(Ordering::Relaxed)
    }

    /// Inserts a record. Returns `false` if the GID is already present.
    pub fn insert(&self, gid: Gid, record: Arc<T>) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.write().entry(gid) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Looks up a record by GID.
    #[must_use]
    pub fn get(&self, gid: Gid) -> Option<Arc<T>> {
        self.entries.read().get(&gid).cloned()
    }

    /// Physically removes a record. GC only.
    pub fn remove(&self, gid: Gid) -> Option<Arc<T>> {
        self.entries.write().remove(&gid)
    }

    /// Number of physically present records (including logically deleted
    /// ones awaiting GC).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no records are physically present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The first entry with a GID strictly greater than `after`.
    #[must_use]
    pub fn first_after(&self, after: Option<Gid>) -> Option<(Gid, Arc<T>)> {
        let lower = match after {
            Some(gid) => Bound::Excluded(gid),
            None => Bound::Unbounded,
        };
        self.entries
            .read()
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(gid, record)| (*gid, Arc::clone(record)))
    }

    /// A lazy GID-ordered cursor over the map.
    #[must_use]
    pub fn iter(&self) -> GidCursor<'_, T> {
        GidCursor {
            map: self,
            last: None,
        }
    }

    /// All GIDs currently present, in order. Intended for tests and GC
    /// sweeps, not hot paths.
    #[must_use]
    pub fn gids(&self) -> Vec<Gid> {
        self.entries.read().keys().copied().collect()
    }
}

impl<T> Default for GidMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered cursor that re-acquires the map lock per step.
///
/// Entries inserted behind the cursor are skipped; entries inserted ahead
/// of it are observed. Removal never invalidates the cursor.
pub struct GidCursor<'a, T> {
    map: &'a GidMap<T>,
    last: Option<Gid>,
}

impl<T> Iterator for GidCursor<'_, T> {
    type Item = (Gid, Arc<T>);

    fn next(&mut self) -> Option<Self::Item> {
        let (gid, record) = self.map.first_after(self.last)?;
        self.last = Some(gid);
        Some((gid, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_allocation_is_monotonic_from_one() {
        let map: GidMap<u32> = GidMap::new();
        assert_eq!(map.allocate_gid(), Gid::new(1));
        assert_eq!(map.allocate_gid(), Gid::new(2));
        assert_eq!(map.peek_next_gid(), 3);
    }

    #[test]
    fn seed_never_moves_backwards() {
        let map: GidMap<u32> = GidMap::new();
        map.seed_next_gid(100);
        assert_eq!(map.allocate_gid(), Gid::new(100));
        map.seed_next_gid(50);
        assert_eq!(map.allocate_gid(), Gid::new(101));
    }

    #[test]
    fn insert_rejects_duplicates() {
        let map = GidMap::new();
        assert!(map.insert(Gid::new(1), Arc::new(10u32)));
        assert!(!map.insert(Gid::new(1), Arc::new(20u32)));
        assert_eq!(*map.get(Gid::new(1)).unwrap(), 10);
    }

    #[test]
    fn cursor_iterates_in_gid_order() {
        let map = GidMap::new();
        for gid in [5u64, 1, 3] {
            map.insert(Gid::new(gid), Arc::new(gid));
        }
        let seen: Vec<u64> = map.iter().map(|(gid, _)| gid.as_u64()).collect();
        assert_eq!(seen, vec![1, 3, 5]);
    }

    #[test]
    fn cursor_sees_insertions_ahead() {
        let map = GidMap::new();
        map.insert(Gid::new(1), Arc::new(1u64));
        map.insert(Gid::new(10), Arc::new(10u64));

        let mut cursor = map.iter();
        assert_eq!(cursor.next().unwrap().0, Gid::new(1));

        // Inserted ahead of the cursor position: must be observed.
        map.insert(Gid::new(5), Arc::new(5u64));
        assert_eq!(cursor.next().unwrap().0, Gid::new(5));
        assert_eq!(cursor.next().unwrap().0, Gid::new(10));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn removal_does_not_invalidate_cursor() {
        let map = GidMap::new();
        for gid in 1..=4u64 {
            map.insert(Gid::new(gid), Arc::new(gid));
        }
        let mut cursor = map.iter();
        assert_eq!(cursor.next().unwrap().0, Gid::new(1));
        map.remove(Gid::new(2));
        assert_eq!(cursor.next().unwrap().0, Gid::new(3));
    }
}
