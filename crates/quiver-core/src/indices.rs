//! Index and constraint bookkeeping.
//!
//! The storage maintains GID sets per declared label and per declared
//! `(label, property)` pair, updated from mutation hooks. Entries are added
//! eagerly and never removed on mutation - a set may hold GIDs whose
//! current version no longer matches, so scans always re-filter through the
//! visibility rule. Physical cleanup rides along with the GC.
//!
//! Constraints store declarations only; validation runs at commit against
//! the new view.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use quiver_common::hash::{FxHashMap, FxHashSet};
use quiver_common::types::{Gid, LabelId, PropertyId, PropertyValue};

use crate::vertex::VertexState;

/// Label and label+property index registries.
pub struct Indices {
    label: RwLock<FxHashMap<LabelId, FxHashSet<Gid>>>,
    label_property: RwLock<FxHashMap<(LabelId, PropertyId), FxHashSet<Gid>>>,
}

impl Indices {
    /// Creates an empty registry with no declared indices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: RwLock::new(FxHashMap::default()),
            label_property: RwLock::new(FxHashMap::default()),
        }
    }

    // === Declarations ===

    /// Declares a label index. Idempotent; returns `false` if it existed.
    pub fn create_label_index(&self, label: LabelId) -> bool {
        let mut map = self.label.write();
        if map.contains_key(&label) {
            return false;
        }
        map.insert(label, FxHashSet::default());
        true
    }

    /// Returns `true` if a label index is declared.
    #[must_use]
    pub fn label_index_exists(&self, label: LabelId) -> bool {
        self.label.read().contains_key(&label)
    }

    /// Drops a label index by identity; returns whether it existed.
    pub fn drop_label_index(&self, label: LabelId) -> bool {
        self.label.write().remove(&label).is_some()
    }

    /// Declares a label+property index. Idempotent.
    pub fn create_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        let mut map = self.label_property.write();
        if map.contains_key(&(label, property)) {
            return false;
        }
        map.insert((label, property), FxHashSet::default());
        true
    }

    /// Returns `true` if a label+property index is declared.
    #[must_use]
    pub fn label_property_index_exists(&self, label: LabelId, property: PropertyId) -> bool {
        self.label_property.read().contains_key(&(label, property))
    }

    /// Drops a label+property index by identity; returns whether it existed.
    pub fn drop_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        self.label_property.write().remove(&(label, property)).is_some()
    }

    /// All declared label indices.
    #[must_use]
    pub fn label_indices(&self) -> Vec<LabelId> {
        let mut labels: Vec<_> = self.label.read().keys().copied().collect();
        labels.sort();
        labels
    }

    /// All declared label+property indices.
    #[must_use]
    pub fn label_property_indices(&self) -> Vec<(LabelId, PropertyId)> {
        let mut pairs: Vec<_> = self.label_property.read().keys().copied().collect();
        pairs.sort();
        pairs
    }

    // === Mutation hooks ===

    /// Called after a label lands on a vertex.
    pub fn on_add_label(
        &self,
        label: LabelId,
        gid: Gid,
        properties: &BTreeMap<PropertyId, PropertyValue>,
    ) {
        if let Some(set) = self.label.write().get_mut(&label) {
            set.insert(gid);
        }
        let mut lp = self.label_property.write();
        for key in properties.keys() {
            if let Some(set) = lp.get_mut(&(label, *key)) {
                set.insert(gid);
            }
        }
    }

    /// Called after a property lands on a vertex.
    pub fn on_set_property(&self, property: PropertyId, gid: Gid, labels: &[LabelId]) {
        let mut lp = self.label_property.write();
        for label in labels {
            if let Some(set) = lp.get_mut(&(*label, property)) {
                set.insert(gid);
            }
        }
    }

    /// Called when the GC physically removes a vertex.
    pub fn on_remove_vertex(&self, gid: Gid) {
        for set in self.label.write().values_mut() {
            set.remove(&gid);
        }
        for set in self.label_property.write().values_mut() {
            set.remove(&gid);
        }
    }

    /// Bulk registration used when an index is created over existing data
    /// or rebuilt at recovery.
    pub fn populate_from(&self, gid: Gid, state: &VertexState) {
        for label in &state.labels {
            self.on_add_label(*label, gid, &state.properties);
        }
    }

    // === Lookup ===

    /// GIDs recorded under a declared label index, or `None` if no index
    /// is declared for the label. Callers must re-check visibility.
    #[must_use]
    pub fn label_entries(&self, label: LabelId) -> Option<Vec<Gid>> {
        self.label.read().get(&label).map(|set| {
            let mut gids: Vec<_> = set.iter().copied().collect();
            gids.sort();
            gids
        })
    }

    /// GIDs recorded under a declared label+property index.
    #[must_use]
    pub fn label_property_entries(&self, label: LabelId, property: PropertyId) -> Option<Vec<Gid>> {
        self.label_property.read().get(&(label, property)).map(|set| {
            let mut gids: Vec<_> = set.iter().copied().collect();
            gids.sort();
            gids
        })
    }
}

impl Default for Indices {
    fn default() -> Self {
        Self::new()
    }
}

/// Existence and unique constraint declarations.
///
/// Declarations are idempotent and removable by identity. Unique
/// constraints keep their property sets sorted so identity comparison is
/// order-insensitive.
pub struct ConstraintSet {
    existence: RwLock<Vec<(LabelId, PropertyId)>>,
    unique: RwLock<Vec<(LabelId, Vec<PropertyId>)>>,
}

impl ConstraintSet {
    /// Creates an empty constraint set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            existence: RwLock::new(Vec::new()),
            unique: RwLock::new(Vec::new()),
        }
    }

    /// Declares an existence constraint. Returns `false` if it existed.
    pub fn declare_existence(&self, label: LabelId, property: PropertyId) -> bool {
        let mut existence = self.existence.write();
        if existence.contains(&(label, property)) {
            return false;
        }
        existence.push((label, property));
        true
    }

    /// Drops an existence constraint by identity.
    pub fn drop_existence(&self, label: LabelId, property: PropertyId) -> bool {
        let mut existence = self.existence.write();
        match existence.iter().position(|c| *c == (label, property)) {
            Some(idx) => {
                existence.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Declares a unique constraint. Returns `false` if it existed.
    pub fn declare_unique(&self, label: LabelId, mut properties: Vec<PropertyId>) -> bool {
        properties.sort();
        properties.dedup();
        let mut unique = self.unique.write();
        if unique.iter().any(|(l, p)| *l == label && *p == properties) {
            return false;
        }
        unique.push((label, properties));
        true
    }

    /// Drops a unique constraint by identity.
    pub fn drop_unique(&self, label: LabelId, mut properties: Vec<PropertyId>) -> bool {
        properties.sort();
        properties.dedup();
        let mut unique = self.unique.write();
        match unique
            .iter()
            .position(|(l, p)| *l == label && *p == properties)
        {
            Some(idx) => {
                unique.remove(idx);
                true
            }
            None => false,
        }
    }

    /// All declared existence constraints.
    #[must_use]
    pub fn existence_constraints(&self) -> Vec<(LabelId, PropertyId)> {
        self.existence.read().clone()
    }

    /// All declared unique constraints.
    #[must_use]
    pub fn unique_constraints(&self) -> Vec<(LabelId, Vec<PropertyId>)> {
        self.unique.read().clone()
    }

    /// Checks one vertex state against every existence constraint.
    ///
    /// Returns the first violated `(label, property)` pair, if any.
    #[must_use]
    pub fn existence_violation(&self, state: &VertexState) -> Option<(LabelId, PropertyId)> {
        self.existence
            .read()
            .iter()
            .find(|(label, property)| {
                state.has_label(*label) && !state.properties.contains_key(property)
            })
            .copied()
    }

    /// The unique-constraint value tuple of a vertex, or `None` if the
    /// constraint does not apply (label or some property missing).
    #[must_use]
    pub fn unique_tuple(
        state: &VertexState,
        label: LabelId,
        properties: &[PropertyId],
    ) -> Option<Vec<PropertyValue>> {
        if !state.has_label(label) {
            return None;
        }
        properties
            .iter()
            .map(|p| state.properties.get(p).cloned())
            .collect()
    }
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self::new()
    }
}
