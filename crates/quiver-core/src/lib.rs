//! The MVCC kernel of the Quiver storage engine.
//!
//! Everything below the transactional API lives here: version records
//! ([`delta`]), the vertex and edge records themselves ([`vertex`],
//! [`edge`]), the GID-ordered concurrent store ([`store`]), the name
//! interner ([`mapper`]), snapshot-isolation visibility ([`visibility`]),
//! and index/constraint bookkeeping ([`indices`]).
//!
//! The kernel knows nothing about durability or configuration; the engine
//! crate wires those on top.

pub mod delta;
pub mod edge;
pub mod indices;
pub mod mapper;
pub mod store;
pub mod vertex;
pub mod visibility;

pub use delta::{Delta, DeltaAction, ObjectRef, TXN_ID_BIT, is_transaction_id};
pub use edge::{Edge, EdgeRef, EdgeState};
pub use indices::{ConstraintSet, Indices};
pub use mapper::NameIdMapper;
pub use store::GidMap;
pub use vertex::{AdjacencyEntry, Vertex, VertexState};
pub use visibility::{ViewParams, reconstruct_edge, reconstruct_vertex};
