//! Core identifier and enumeration types.
//!
//! Every object kind gets its own newtype over `u64` so a vertex GID can
//! never be confused with an edge GID or an interned name id. All of them
//! are cheap `Copy` values.

mod value;

pub use value::PropertyValue;

use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Creates an id from its raw integer representation.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying integer.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// A globally unique identifier for one object kind within a storage
    /// instance. Allocated from a monotonic per-kind counter.
    Gid
}

id_type! {
    /// An interned vertex label name.
    LabelId
}

id_type! {
    /// An interned property key name.
    PropertyId
}

id_type! {
    /// An interned edge type name.
    EdgeTypeId
}

/// Which version of an object a read should observe.
///
/// `Old` reconstructs the state as of transaction start with the
/// transaction's own writes undone; `New` includes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// The state before this transaction's own modifications.
    Old,
    /// The state including this transaction's own modifications.
    New,
}

/// Transaction isolation level.
///
/// Controls which concurrent writes a reader observes. All levels record
/// deltas identically; the differences live entirely in the visibility
/// rule.
///
/// | Level | Dirty reads | Non-repeatable reads |
/// |-------|-------------|----------------------|
/// | SnapshotIsolation | No | No |
/// | ReadCommitted | No | Yes |
/// | ReadUncommitted | Yes | Yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each transaction sees a consistent snapshot as of its start
    /// timestamp. Writers on the same object conflict.
    #[default]
    SnapshotIsolation,

    /// Reads refresh their effective start timestamp on every access, so
    /// later commits become visible mid-transaction.
    ReadCommitted,

    /// Reads accept uncommitted writes of other transactions (the raw
    /// live state).
    ReadUncommitted,
}

/// How the engine trades isolation for write throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Full MVCC: delta chains, conflict detection, WAL on commit.
    #[default]
    InMemoryTransactional,

    /// In-place writes with no version records and no WAL. Intended for
    /// bulk analytical loads; durability comes only from explicit
    /// snapshots.
    InMemoryAnalytical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        let gid = Gid::new(42);
        assert_eq!(gid.as_u64(), 42);
        assert_eq!(format!("{gid:?}"), "Gid(42)");
        assert_eq!(format!("{gid}"), "42");
    }

    #[test]
    fn id_types_are_ordered() {
        assert!(Gid::new(1) < Gid::new(2));
        assert!(LabelId::new(7) > LabelId::new(0));
    }

    #[test]
    fn isolation_default_is_snapshot() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::SnapshotIsolation);
    }

    #[test]
    fn storage_mode_default_is_transactional() {
        assert_eq!(StorageMode::default(), StorageMode::InMemoryTransactional);
    }
}
