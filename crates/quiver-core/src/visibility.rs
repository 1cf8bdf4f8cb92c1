//! Snapshot-isolation visibility.
//!
//! Readers copy an object's live state plus chain head under the object
//! lock, then walk the chain outside it, applying inverse operations until
//! they reach a delta whose stamp is already visible to them. Isolation
//! levels differ only in how stamps are classified; delta creation never
//! varies.

use std::sync::Arc;

use quiver_common::types::{IsolationLevel, View};

use crate::delta::{Delta, DeltaAction, is_transaction_id};
use crate::edge::{Edge, EdgeState};
use crate::vertex::{AdjacencyEntry, Vertex, VertexState};

/// Everything the visibility rule needs to know about the reader.
#[derive(Debug, Clone, Copy)]
pub struct ViewParams {
    /// The reader's effective start timestamp. For `ReadCommitted` the
    /// caller refreshes this to the current clock on every read.
    pub start_ts: u64,
    /// The reader's transaction id (with the id bit set).
    pub txn_id: u64,
    /// Old or new view of the reader's own writes.
    pub view: View,
    /// The reader's isolation level.
    pub isolation: IsolationLevel,
}

enum Classification {
    /// The delta's write is invisible: apply the inverse.
    Apply,
    /// The delta is the reader's own write in the new view: keep walking.
    Skip,
    /// The delta's write is visible: the walk is done.
    Stop,
}

fn classify(stamp: u64, params: &ViewParams) -> Classification {
    if stamp == params.txn_id {
        // Own write: present in the live state; undo only for the old view.
        return match params.view {
            View::Old => Classification::Apply,
            View::New => Classification::Skip,
        };
    }

    if params.isolation == IsolationLevel::ReadUncommitted {
        // Accept everything as-is, committed or not.
        return Classification::Stop;
    }

    if is_transaction_id(stamp) {
        // Another live transaction's uncommitted write.
        Classification::Apply
    } else if stamp <= params.start_ts {
        Classification::Stop
    } else {
        Classification::Apply
    }
}

fn walk<S>(
    mut state: S,
    mut delta: Option<Arc<Delta>>,
    params: &ViewParams,
    apply: impl Fn(&mut S, &DeltaAction),
) -> S {
    while let Some(current) = delta {
        match classify(current.stamp(), params) {
            Classification::Stop => break,
            Classification::Skip => {}
            Classification::Apply => apply(&mut state, current.action()),
        }
        delta = current.next();
    }
    state
}

/// Applies one inverse operation to a vertex state.
pub fn apply_vertex_delta(state: &mut VertexState, action: &DeltaAction) {
    match action {
        DeltaAction::RecreateObject => state.deleted = false,
        DeltaAction::DeleteObject => state.deleted = true,
        DeltaAction::SetProperty { key, value } => {
            if value.is_null() {
                state.properties.remove(key);
            } else {
                state.properties.insert(*key, value.clone());
            }
        }
        DeltaAction::AddLabel(label) => {
            state.add_label(*label);
        }
        DeltaAction::RemoveLabel(label) => {
            state.remove_label(*label);
        }
        DeltaAction::AddInEdge {
            edge_type,
            vertex,
            edge,
        } => {
            state.in_edges.push(AdjacencyEntry {
                edge_type: *edge_type,
                vertex: *vertex,
                edge: edge.clone(),
            });
        }
        DeltaAction::AddOutEdge {
            edge_type,
            vertex,
            edge,
        } => {
            state.out_edges.push(AdjacencyEntry {
                edge_type: *edge_type,
                vertex: *vertex,
                edge: edge.clone(),
            });
        }
        DeltaAction::RemoveInEdge { edge, .. } => {
            state.remove_in_edge(edge.gid());
        }
        DeltaAction::RemoveOutEdge { edge, .. } => {
            state.remove_out_edge(edge.gid());
        }
    }
}

/// Applies one inverse operation to an edge state.
pub fn apply_edge_delta(state: &mut EdgeState, action: &DeltaAction) {
    match action {
        DeltaAction::RecreateObject => state.deleted = false,
        DeltaAction::DeleteObject => state.deleted = true,
        DeltaAction::SetProperty { key, value } => {
            if value.is_null() {
                state.properties.remove(key);
            } else {
                state.properties.insert(*key, value.clone());
            }
        }
        // Adjacency and label actions never land on edge chains.
        _ => {}
    }
}

/// Reconstructs the vertex state the reader is allowed to see, including
/// the deletion flag. Returns the raw state; use [`reconstruct_vertex`]
/// when invisible-because-deleted should collapse to `None`.
#[must_use]
pub fn reconstruct_vertex_state(vertex: &Vertex, params: &ViewParams) -> VertexState {
    let (state, delta) = {
        let data = vertex.data.read();
        (data.state.clone(), data.delta.clone())
    };
    walk(state, delta, params, apply_vertex_delta)
}

/// Reconstructs the vertex for the reader, or `None` if it is deleted or
/// not yet created in this view.
#[must_use]
pub fn reconstruct_vertex(vertex: &Vertex, params: &ViewParams) -> Option<VertexState> {
    let state = reconstruct_vertex_state(vertex, params);
    if state.deleted { None } else { Some(state) }
}

/// Reconstructs the edge state the reader is allowed to see.
#[must_use]
pub fn reconstruct_edge_state(edge: &Edge, params: &ViewParams) -> EdgeState {
    let (state, delta) = {
        let data = edge.data.read();
        (data.state.clone(), data.delta.clone())
    };
    walk(state, delta, params, apply_edge_delta)
}

/// Reconstructs the edge for the reader, or `None` if it is deleted or not
/// yet created in this view.
#[must_use]
pub fn reconstruct_edge(edge: &Edge, params: &ViewParams) -> Option<EdgeState> {
    let state = reconstruct_edge_state(edge, params);
    if state.deleted { None } else { Some(state) }
}
