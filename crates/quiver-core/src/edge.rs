//! Edge records.
//!
//! An edge's endpoints and type live in the adjacency lists of its incident
//! vertices; the record here only carries properties and MVCC metadata.
//! When the storage runs with properties on edges disabled there is no
//! record at all - the edge exists purely as adjacency entries, identified
//! by GID.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use quiver_common::types::{Gid, PropertyId, PropertyValue};

use crate::delta::Delta;

/// How adjacency entries refer to an edge.
///
/// With properties on edges the entry holds the record itself; without,
/// only the GID.
#[derive(Clone)]
pub enum EdgeRef {
    /// A handle to the heap record (properties on edges enabled).
    Handle(Arc<Edge>),
    /// A bare GID (properties on edges disabled).
    Gid(Gid),
}

impl EdgeRef {
    /// The edge's GID regardless of representation.
    #[must_use]
    pub fn gid(&self) -> Gid {
        match self {
            EdgeRef::Handle(e) => e.gid,
            EdgeRef::Gid(gid) => *gid,
        }
    }

    /// The heap record, if this storage keeps one.
    #[must_use]
    pub fn handle(&self) -> Option<&Arc<Edge>> {
        match self {
            EdgeRef::Handle(e) => Some(e),
            EdgeRef::Gid(_) => None,
        }
    }
}

impl PartialEq for EdgeRef {
    fn eq(&self, other: &Self) -> bool {
        self.gid() == other.gid()
    }
}

impl Eq for EdgeRef {}

impl std::fmt::Debug for EdgeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdgeRef({})", self.gid())
    }
}

/// The mutable part of an edge record.
#[derive(Debug, Clone, Default)]
pub struct EdgeState {
    /// Property key to value mapping.
    pub properties: BTreeMap<PropertyId, PropertyValue>,
    /// Logical deletion flag; physical removal is the GC's job.
    pub deleted: bool,
}

/// Everything the record guards behind its lock.
#[derive(Debug, Default)]
pub struct EdgeData {
    /// Current state of the edge.
    pub state: EdgeState,
    /// Head of the version chain, newest first.
    pub delta: Option<Arc<Delta>>,
}

/// An edge record with per-object locking.
pub struct Edge {
    /// The edge's globally unique id.
    pub gid: Gid,
    /// State and chain head, guarded by the object lock.
    pub data: RwLock<EdgeData>,
}

impl Edge {
    /// Creates a live edge with no properties and no history.
    #[must_use]
    pub fn new(gid: Gid) -> Arc<Self> {
        Arc::new(Self {
            gid,
            data: RwLock::new(EdgeData::default()),
        })
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Edge({})", self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_refs_compare_by_gid() {
        let edge = Edge::new(Gid::new(5));
        let by_handle = EdgeRef::Handle(Arc::clone(&edge));
        let by_gid = EdgeRef::Gid(Gid::new(5));
        assert_eq!(by_handle, by_gid);
        assert_eq!(by_handle.gid(), Gid::new(5));
        assert!(by_gid.handle().is_none());
        assert!(by_handle.handle().is_some());
    }
}
