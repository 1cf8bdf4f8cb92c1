//! Vertex records.
//!
//! A vertex owns its labels, properties, and both adjacency directions.
//! Bidirectional adjacency is maintained as an invariant: every edge
//! appears in its source's `out_edges` and its destination's `in_edges`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use quiver_common::types::{EdgeTypeId, Gid, LabelId, PropertyId, PropertyValue};
use smallvec::SmallVec;

use crate::delta::Delta;
use crate::edge::EdgeRef;

/// One adjacency list entry: edge type, peer vertex, and the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacencyEntry {
    /// The edge's type.
    pub edge_type: EdgeTypeId,
    /// The vertex on the other side.
    pub vertex: Gid,
    /// The edge itself.
    pub edge: EdgeRef,
}

/// The mutable part of a vertex record.
#[derive(Debug, Clone, Default)]
pub struct VertexState {
    /// Labels; unique, insertion order irrelevant. Most vertices carry a
    /// handful, so the storage is inline.
    pub labels: SmallVec<[LabelId; 4]>,
    /// Property key to value mapping.
    pub properties: BTreeMap<PropertyId, PropertyValue>,
    /// Incoming edges: `(type, source vertex, edge)`.
    pub in_edges: Vec<AdjacencyEntry>,
    /// Outgoing edges: `(type, destination vertex, edge)`.
    pub out_edges: Vec<AdjacencyEntry>,
    /// Logical deletion flag; physical removal is the GC's job.
    pub deleted: bool,
}

impl VertexState {
    /// Returns `true` if the vertex carries the label.
    #[must_use]
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Adds a label if absent; returns whether it was added.
    pub fn add_label(&mut self, label: LabelId) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Removes a label if present; returns whether it was removed.
    pub fn remove_label(&mut self, label: LabelId) -> bool {
        match self.labels.iter().position(|l| *l == label) {
            Some(idx) => {
                self.labels.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Removes the adjacency entry for `edge` from `in_edges`.
    pub fn remove_in_edge(&mut self, edge: Gid) -> bool {
        match self.in_edges.iter().position(|e| e.edge.gid() == edge) {
            Some(idx) => {
                self.in_edges.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Removes the adjacency entry for `edge` from `out_edges`.
    pub fn remove_out_edge(&mut self, edge: Gid) -> bool {
        match self.out_edges.iter().position(|e| e.edge.gid() == edge) {
            Some(idx) => {
                self.out_edges.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Everything the record guards behind its lock.
#[derive(Debug, Default)]
pub struct VertexData {
    /// Current state of the vertex.
    pub state: VertexState,
    /// Head of the version chain, newest first.
    pub delta: Option<Arc<Delta>>,
}

/// A vertex record with per-object locking.
///
/// Writers take the lock to install deltas and mutate state; readers copy
/// `(state, chain head)` under the lock and reconstruct their view outside
/// it.
pub struct Vertex {
    /// The vertex's globally unique id.
    pub gid: Gid,
    /// State and chain head, guarded by the object lock.
    pub data: RwLock<VertexData>,
}

impl Vertex {
    /// Creates a live vertex with no labels, properties, or edges.
    #[must_use]
    pub fn new(gid: Gid) -> Arc<Self> {
        Arc::new(Self {
            gid,
            data: RwLock::new(VertexData::default()),
        })
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vertex({})", self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_stay_unique() {
        let mut state = VertexState::default();
        assert!(state.add_label(LabelId::new(1)));
        assert!(!state.add_label(LabelId::new(1)));
        assert_eq!(state.labels.len(), 1);
        assert!(state.remove_label(LabelId::new(1)));
        assert!(!state.remove_label(LabelId::new(1)));
    }

    #[test]
    fn adjacency_removal_matches_by_edge_gid() {
        let mut state = VertexState::default();
        state.out_edges.push(AdjacencyEntry {
            edge_type: EdgeTypeId::new(1),
            vertex: Gid::new(2),
            edge: EdgeRef::Gid(Gid::new(10)),
        });
        state.out_edges.push(AdjacencyEntry {
            edge_type: EdgeTypeId::new(1),
            vertex: Gid::new(3),
            edge: EdgeRef::Gid(Gid::new(11)),
        });

        assert!(state.remove_out_edge(Gid::new(10)));
        assert_eq!(state.out_edges.len(), 1);
        assert_eq!(state.out_edges[0].edge.gid(), Gid::new(11));
        assert!(!state.remove_out_edge(Gid::new(10)));
    }
}
