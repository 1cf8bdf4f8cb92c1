//! The name to id interner.
//!
//! Labels, edge types, and property keys share one id space: a bijection
//! between interned strings and dense `u64` ids. The mapping is append-only
//! at runtime; snapshots persist the referenced subset and recovery
//! re-interns, so a persisted id may map to a different runtime id.

use arcstr::ArcStr;
use parking_lot::RwLock;
use quiver_common::hash::FxHashMap;

/// Bijection between interned names and dense ids.
///
/// `name_to_id` interns on first sight; `id_to_name` is a plain vector
/// lookup since ids are dense.
pub struct NameIdMapper {
    name_to_id: RwLock<FxHashMap<ArcStr, u64>>,
    id_to_name: RwLock<Vec<ArcStr>>,
}

impl NameIdMapper {
    /// Creates an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name_to_id: RwLock::new(FxHashMap::default()),
            id_to_name: RwLock::new(Vec::new()),
        }
    }

    /// Returns the id for `name`, interning it if absent.
    pub fn name_to_id(&self, name: &str) -> u64 {
        if let Some(id) = self.name_to_id.read().get(name) {
            return *id;
        }

        let mut forward = self.name_to_id.write();
        // Raced with another interner between the locks.
        if let Some(id) = forward.get(name) {
            return *id;
        }

        let mut reverse = self.id_to_name.write();
        let id = reverse.len() as u64;
        let interned = ArcStr::from(name);
        reverse.push(interned.clone());
        forward.insert(interned, id);
        id
    }

    /// Returns the name for `id`, if the id was ever handed out.
    #[must_use]
    pub fn id_to_name(&self, id: u64) -> Option<ArcStr> {
        self.id_to_name.read().get(id as usize).cloned()
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_name.read().len()
    }

    /// Returns `true` if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_name.read().is_empty()
    }
}

impl Default for NameIdMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mapper = NameIdMapper::new();
        let a = mapper.name_to_id("Person");
        let b = mapper.name_to_id("Person");
        assert_eq!(a, b);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn ids_are_dense() {
        let mapper = NameIdMapper::new();
        assert_eq!(mapper.name_to_id("a"), 0);
        assert_eq!(mapper.name_to_id("b"), 1);
        assert_eq!(mapper.name_to_id("c"), 2);
    }

    #[test]
    fn reverse_lookup() {
        let mapper = NameIdMapper::new();
        let id = mapper.name_to_id("KNOWS");
        assert_eq!(mapper.id_to_name(id).as_deref(), Some("KNOWS"));
        assert_eq!(mapper.id_to_name(id + 1), None);
    }

    #[test]
    fn concurrent_interning_yields_one_id() {
        use std::sync::Arc;
        use std::thread;

        let mapper = Arc::new(NameIdMapper::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mapper = Arc::clone(&mapper);
                thread::spawn(move || mapper.name_to_id("shared"))
            })
            .collect();

        let ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(mapper.len(), 1);
    }
}
