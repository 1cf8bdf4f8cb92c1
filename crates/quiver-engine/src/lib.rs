//! Quiver: a durable MVCC property-graph storage engine.
//!
//! An in-memory store of vertices and edges with snapshot-isolated
//! transactions, a write-ahead log, periodic full snapshots, and a
//! background garbage collector reclaiming obsolete version records.
//!
//! # Example
//!
//! ```no_run
//! use quiver_common::types::View;
//! use quiver_engine::{Config, Storage};
//!
//! # fn main() -> quiver_common::Result<()> {
//! let storage = Storage::open(Config::new("/tmp/my_graph"))?;
//!
//! let mut txn = storage.access();
//! let gid = {
//!     let alice = txn.create_vertex();
//!     alice.add_label(txn.label_id("Person"))?;
//!     alice.set_property(txn.property_id("name"), "Alice".into())?;
//!     alice.gid()
//! };
//! txn.commit()?;
//!
//! let reader = storage.access();
//! assert!(reader.find_vertex(gid, View::New).is_some());
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod durability;
mod gc;
pub mod storage;
mod transaction;

pub use accessor::{Accessor, EdgeAccessor, VertexAccessor, VertexStream};
pub use config::Config;
pub use gc::GcStats;
pub use storage::Storage;

pub use quiver_common::types::{IsolationLevel, StorageMode, View};
pub use quiver_common::{Error, Result};
