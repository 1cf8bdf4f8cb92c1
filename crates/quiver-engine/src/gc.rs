//! Version-chain garbage collection.
//!
//! A delta is reclaimable once its commit timestamp precedes the start of
//! every live transaction: no current or future reader will ever apply it.
//! The collector truncates chains at the first such delta, then physically
//! removes objects whose live state is deleted with no history left.
//!
//! Two modes: cooperative runs alongside transactions using the per-object
//! locks; exclusive is the fast path when nothing is live - it holds the
//! live-set lock so no transaction can begin, and drops whole chains
//! without per-delta stamp checks. Exclusive degrades to cooperative the
//! moment anything is live.

use std::sync::Arc;

use quiver_common::hash::FxHashSet;
use quiver_core::delta::{Delta, ObjectRef, is_transaction_id};

use crate::storage::StorageInner;
use crate::transaction::CommittedTransaction;

/// What one collection cycle accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Committed transactions whose deltas were reclaimed.
    pub reclaimed_transactions: usize,
    /// Vertices physically removed from the store.
    pub removed_vertices: usize,
    /// Edges physically removed from the store.
    pub removed_edges: usize,
    /// Whether the fast exclusive mode ran.
    pub exclusive: bool,
}

/// Runs one collection cycle.
pub(crate) fn collect(inner: &StorageInner) -> GcStats {
    let stats = match inner.live.lock_if_empty() {
        Some(_guard) => collect_exclusive(inner),
        None => collect_cooperative(inner),
    };
    if stats.reclaimed_transactions > 0 || stats.removed_vertices > 0 || stats.removed_edges > 0 {
        tracing::debug!(
            reclaimed = stats.reclaimed_transactions,
            vertices = stats.removed_vertices,
            edges = stats.removed_edges,
            exclusive = stats.exclusive,
            "garbage collection cycle"
        );
    }
    stats
}

fn collect_cooperative(inner: &StorageInner) -> GcStats {
    let oldest = inner
        .live
        .oldest_start_ts()
        .unwrap_or_else(|| inner.current_timestamp() + 1);

    let ready = drain_reclaimable(inner, oldest);
    let mut stats = GcStats {
        reclaimed_transactions: ready.len(),
        ..GcStats::default()
    };

    // Prune each touched object's chain once.
    let mut pruned = FxHashSet::default();
    for txn in &ready {
        for tracked in &txn.deltas {
            match &tracked.object {
                ObjectRef::Vertex(vertex) => {
                    if pruned.insert((0u8, vertex.gid)) {
                        let mut data = vertex.data.write();
                        prune_chain(&mut data.delta, oldest);
                    }
                }
                ObjectRef::Edge(edge) => {
                    if pruned.insert((1u8, edge.gid)) {
                        let mut data = edge.data.write();
                        prune_chain(&mut data.delta, oldest);
                    }
                }
            }
        }
    }
    drop(ready); // frees the delta allocations

    sweep_deleted(inner, &mut stats);
    stats
}

fn collect_exclusive(inner: &StorageInner) -> GcStats {
    // No transaction is live and none can begin while the caller holds the
    // live-set guard, so every chain consists of committed deltas nobody
    // can ever need again.
    let ready: Vec<CommittedTransaction> = inner.committed.lock().drain(..).collect();
    let mut stats = GcStats {
        reclaimed_transactions: ready.len(),
        exclusive: true,
        ..GcStats::default()
    };

    for txn in &ready {
        for tracked in &txn.deltas {
            match &tracked.object {
                ObjectRef::Vertex(vertex) => vertex.data.write().delta = None,
                ObjectRef::Edge(edge) => edge.data.write().delta = None,
            }
        }
    }
    drop(ready);

    sweep_deleted(inner, &mut stats);
    stats
}

/// Pulls every committed transaction older than all live readers off the
/// queue.
fn drain_reclaimable(inner: &StorageInner, oldest: u64) -> Vec<CommittedTransaction> {
    let mut queue = inner.committed.lock();
    let mut ready = Vec::new();
    let mut keep = std::collections::VecDeque::with_capacity(queue.len());
    for txn in queue.drain(..) {
        if txn.commit_ts < oldest {
            ready.push(txn);
        } else {
            keep.push_back(txn);
        }
    }
    *queue = keep;
    ready
}

/// Cuts the chain at the first delta no live reader can ever apply.
///
/// Uncommitted (transaction-id) stamps are walked past, never truncated:
/// their owner is still live or mid-abort.
fn prune_chain(head: &mut Option<Arc<Delta>>, oldest: u64) {
    let Some(first) = head else {
        return;
    };
    let stamp = first.stamp();
    if !is_transaction_id(stamp) && stamp < oldest {
        *head = None;
        return;
    }
    let mut cursor = Arc::clone(first);
    loop {
        let Some(next) = cursor.next() else {
            return;
        };
        let stamp = next.stamp();
        if !is_transaction_id(stamp) && stamp < oldest {
            cursor.set_next(None);
            return;
        }
        cursor = next;
    }
}

/// Physically removes objects that are deleted with no version history:
/// committed deletions past every reader, and tombstones of aborted
/// creations.
fn sweep_deleted(inner: &StorageInner, stats: &mut GcStats) {
    let mut dead_vertices = Vec::new();
    for (gid, vertex) in inner.vertices.iter() {
        let data = vertex.data.read();
        if data.state.deleted && data.delta.is_none() {
            dead_vertices.push(gid);
        }
    }
    for gid in dead_vertices {
        inner.vertices.remove(gid);
        inner.indices.on_remove_vertex(gid);
        stats.removed_vertices += 1;
    }

    let mut dead_edges = Vec::new();
    for (gid, edge) in inner.edges.iter() {
        let data = edge.data.read();
        if data.state.deleted && data.delta.is_none() {
            dead_edges.push(gid);
        }
    }
    for gid in dead_edges {
        inner.edges.remove(gid);
        stats.removed_edges += 1;
    }
}
