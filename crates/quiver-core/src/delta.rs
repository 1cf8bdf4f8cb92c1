//! Version records and delta chains.
//!
//! Every write appends one [`Delta`] holding the *inverse* of the operation
//! to the owning object's chain. Walking the chain from the head re-derives
//! older states of the object, which is how readers get snapshot isolation
//! without blocking writers.
//!
//! A chain is linked newest-to-oldest through `next`. All deltas produced by
//! one transaction share a single stamp cell: until commit it holds the
//! transaction id (distinguished by [`TXN_ID_BIT`]), and commit re-stamps
//! every delta of the transaction with one atomic store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use quiver_common::types::{EdgeTypeId, Gid, LabelId, PropertyId, PropertyValue};

use crate::edge::{Edge, EdgeRef};
use crate::vertex::Vertex;

/// Stamps with this bit set are transaction ids; without it they are commit
/// timestamps. The two spaces never collide.
pub const TXN_ID_BIT: u64 = 1 << 63;

/// Returns `true` if the stamp is an (uncommitted) transaction id.
#[inline]
#[must_use]
pub const fn is_transaction_id(stamp: u64) -> bool {
    stamp & TXN_ID_BIT != 0
}

/// The inverse operation recorded by a delta.
///
/// Applying the action to a reconstructed state undoes the write that
/// created the delta.
#[derive(Debug, Clone)]
pub enum DeltaAction {
    /// Undoes a delete: the object exists again.
    RecreateObject,
    /// Undoes a create: the object does not exist.
    DeleteObject,
    /// Restores the previous value of a property (`Null` meaning absent).
    SetProperty {
        /// The property key.
        key: PropertyId,
        /// The value before the write.
        value: PropertyValue,
    },
    /// Re-adds a label that the write removed.
    AddLabel(LabelId),
    /// Removes a label that the write added.
    RemoveLabel(LabelId),
    /// Re-adds an incoming adjacency entry.
    AddInEdge {
        /// The edge type.
        edge_type: EdgeTypeId,
        /// The peer (source) vertex.
        vertex: Gid,
        /// The edge itself.
        edge: EdgeRef,
    },
    /// Re-adds an outgoing adjacency entry.
    AddOutEdge {
        /// The edge type.
        edge_type: EdgeTypeId,
        /// The peer (destination) vertex.
        vertex: Gid,
        /// The edge itself.
        edge: EdgeRef,
    },
    /// Removes an incoming adjacency entry.
    RemoveInEdge {
        /// The edge type.
        edge_type: EdgeTypeId,
        /// The peer (source) vertex.
        vertex: Gid,
        /// The edge itself.
        edge: EdgeRef,
    },
    /// Removes an outgoing adjacency entry.
    RemoveOutEdge {
        /// The edge type.
        edge_type: EdgeTypeId,
        /// The peer (destination) vertex.
        vertex: Gid,
        /// The edge itself.
        edge: EdgeRef,
    },
}

/// One version record in an object's chain.
pub struct Delta {
    action: DeltaAction,
    stamp: Arc<AtomicU64>,
    next: RwLock<Option<Arc<Delta>>>,
}

impl Delta {
    /// Creates a delta sharing the given stamp cell with its transaction.
    #[must_use]
    pub fn new(action: DeltaAction, stamp: Arc<AtomicU64>) -> Arc<Self> {
        Arc::new(Self {
            action,
            stamp,
            next: RwLock::new(None),
        })
    }

    /// Returns the current stamp: a transaction id before commit, the
    /// commit timestamp after.
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    /// The recorded inverse operation.
    #[inline]
    #[must_use]
    pub fn action(&self) -> &DeltaAction {
        &self.action
    }

    /// The next (older) delta in the chain.
    #[must_use]
    pub fn next(&self) -> Option<Arc<Delta>> {
        self.next.read().clone()
    }

    /// Links this delta in front of `older`.
    pub fn set_next(&self, older: Option<Arc<Delta>>) {
        *self.next.write() = older;
    }
}

impl std::fmt::Debug for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delta")
            .field("action", &self.action)
            .field("stamp", &self.stamp())
            .finish_non_exhaustive()
    }
}

/// The object a tracked delta belongs to, for abort and GC.
#[derive(Clone)]
pub enum ObjectRef {
    /// A vertex record.
    Vertex(Arc<Vertex>),
    /// An edge record.
    Edge(Arc<Edge>),
}

impl ObjectRef {
    /// The GID of the referenced object.
    #[must_use]
    pub fn gid(&self) -> Gid {
        match self {
            ObjectRef::Vertex(v) => v.gid,
            ObjectRef::Edge(e) => e.gid,
        }
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Vertex(v) => write!(f, "Vertex({})", v.gid),
            ObjectRef::Edge(e) => write!(f, "Edge({})", e.gid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_id_space_is_disjoint() {
        assert!(is_transaction_id(TXN_ID_BIT));
        assert!(is_transaction_id(TXN_ID_BIT | 42));
        assert!(!is_transaction_id(0));
        assert!(!is_transaction_id(u64::MAX >> 1));
    }

    #[test]
    fn commit_restamps_all_deltas_at_once() {
        let stamp = Arc::new(AtomicU64::new(TXN_ID_BIT | 7));
        let d1 = Delta::new(DeltaAction::DeleteObject, Arc::clone(&stamp));
        let d2 = Delta::new(DeltaAction::RecreateObject, Arc::clone(&stamp));

        assert!(is_transaction_id(d1.stamp()));
        assert!(is_transaction_id(d2.stamp()));

        // One store re-stamps every delta of the transaction.
        stamp.store(99, Ordering::Release);
        assert_eq!(d1.stamp(), 99);
        assert_eq!(d2.stamp(), 99);
    }

    #[test]
    fn chain_links_newest_to_oldest() {
        let stamp = Arc::new(AtomicU64::new(TXN_ID_BIT | 1));
        let older = Delta::new(DeltaAction::DeleteObject, Arc::clone(&stamp));
        let newer = Delta::new(DeltaAction::AddLabel(LabelId::new(3)), stamp);

        newer.set_next(Some(Arc::clone(&older)));
        let next = newer.next().unwrap();
        assert!(matches!(next.action(), DeltaAction::DeleteObject));
        assert!(next.next().is_none());
    }
}
