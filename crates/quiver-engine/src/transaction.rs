//! Transaction state and the live-transaction registry.
//!
//! Start and commit timestamps come from one logical clock. A transaction's
//! id lives in a disjoint stamp space (the high bit is set) so deltas can
//! carry either an owner id or a commit timestamp in the same cell; commit
//! swaps id for timestamp with a single atomic store shared by every delta
//! of the transaction.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use quiver_common::types::{IsolationLevel, StorageMode, View};
use quiver_core::delta::{Delta, DeltaAction, ObjectRef};
use quiver_core::visibility::ViewParams;

use crate::durability::WalOp;

/// A delta together with the object it was installed on, kept for abort
/// and garbage collection.
pub(crate) struct TrackedDelta {
    /// The object whose chain holds the delta.
    pub object: ObjectRef,
    /// The delta itself.
    pub delta: Arc<Delta>,
}

/// Per-transaction state owned by an accessor.
pub(crate) struct Transaction {
    /// Transaction id, high bit set.
    pub id: u64,
    /// Start timestamp drawn from the logical clock.
    pub start_ts: u64,
    /// Stamp cell shared with every delta this transaction installs.
    /// Holds `id` until commit, the commit timestamp after.
    pub stamp: Arc<AtomicU64>,
    /// Isolation level; fixed at begin.
    pub isolation: IsolationLevel,
    /// Transactional MVCC or in-place analytical writes.
    pub mode: StorageMode,
    /// Deltas in install order; abort walks them backwards.
    pub deltas: Vec<TrackedDelta>,
    /// Forward operations for the WAL, in apply order.
    pub ops: Vec<WalOp>,
    /// Cleared by commit and abort.
    pub active: bool,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        start_ts: u64,
        isolation: IsolationLevel,
        mode: StorageMode,
    ) -> Self {
        Self {
            id,
            start_ts,
            stamp: Arc::new(AtomicU64::new(id)),
            isolation,
            mode,
            deltas: Vec::new(),
            ops: Vec::new(),
            active: true,
        }
    }

    /// Visibility parameters for a read at `view`. Read-committed readers
    /// refresh their effective start timestamp to the clock's latest.
    pub(crate) fn view_params(&self, view: View, clock_now: u64) -> ViewParams {
        let start_ts = match self.isolation {
            IsolationLevel::ReadCommitted => clock_now,
            _ => self.start_ts,
        };
        ViewParams {
            start_ts,
            txn_id: self.id,
            view,
            isolation: self.isolation,
        }
    }

    /// Records an installed delta for abort and GC. The caller holds the
    /// object lock and has already linked the delta as the chain head.
    pub(crate) fn track(&mut self, object: ObjectRef, delta: Arc<Delta>) {
        self.deltas.push(TrackedDelta { object, delta });
    }

    /// Builds a delta stamped with this transaction's shared cell.
    pub(crate) fn make_delta(&self, action: DeltaAction) -> Arc<Delta> {
        Delta::new(action, Arc::clone(&self.stamp))
    }
}

/// A transaction that finished committing, queued for the collector.
pub(crate) struct CommittedTransaction {
    /// The commit timestamp its deltas now carry.
    pub commit_ts: u64,
    /// Every delta it installed.
    pub deltas: Vec<TrackedDelta>,
}

/// The set of in-flight transactions, ordered by start timestamp.
///
/// Contended only at begin and commit; the collector reads the minimum to
/// decide what is reclaimable, and holds the lock across an exclusive run
/// to keep new transactions out.
pub(crate) struct LiveSet {
    entries: Mutex<BTreeSet<(u64, u64)>>,
}

impl LiveSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) fn register(&self, start_ts: u64, txn_id: u64) {
        self.entries.lock().insert((start_ts, txn_id));
    }

    pub(crate) fn deregister(&self, start_ts: u64, txn_id: u64) {
        self.entries.lock().remove(&(start_ts, txn_id));
    }

    /// Start timestamp of the oldest live transaction, if any.
    pub(crate) fn oldest_start_ts(&self) -> Option<u64> {
        self.entries.lock().first().map(|(start_ts, _)| *start_ts)
    }

    /// Number of live transactions.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Locks out begin() while the guard lives; used by the exclusive
    /// collector mode. Returns `None` when transactions are live.
    pub(crate) fn lock_if_empty(&self) -> Option<parking_lot::MutexGuard<'_, BTreeSet<(u64, u64)>>> {
        let guard = self.entries.lock();
        if guard.is_empty() { Some(guard) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::delta::TXN_ID_BIT;

    #[test]
    fn live_set_tracks_oldest() {
        let live = LiveSet::new();
        assert_eq!(live.oldest_start_ts(), None);

        live.register(10, TXN_ID_BIT | 1);
        live.register(5, TXN_ID_BIT | 2);
        live.register(20, TXN_ID_BIT | 3);
        assert_eq!(live.oldest_start_ts(), Some(5));
        assert_eq!(live.len(), 3);

        live.deregister(5, TXN_ID_BIT | 2);
        assert_eq!(live.oldest_start_ts(), Some(10));
    }

    #[test]
    fn exclusive_lock_requires_empty_set() {
        let live = LiveSet::new();
        assert!(live.lock_if_empty().is_some());

        live.register(1, TXN_ID_BIT | 1);
        assert!(live.lock_if_empty().is_none());
    }

    #[test]
    fn read_committed_refreshes_start_ts() {
        let txn = Transaction::new(
            TXN_ID_BIT | 1,
            5,
            IsolationLevel::ReadCommitted,
            StorageMode::InMemoryTransactional,
        );
        assert_eq!(txn.view_params(View::New, 42).start_ts, 42);

        let txn = Transaction::new(
            TXN_ID_BIT | 2,
            5,
            IsolationLevel::SnapshotIsolation,
            StorageMode::InMemoryTransactional,
        );
        assert_eq!(txn.view_params(View::New, 42).start_ts, 5);
    }
}
