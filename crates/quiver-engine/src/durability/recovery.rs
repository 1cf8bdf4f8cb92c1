//! Startup recovery.
//!
//! Loads the newest valid snapshot, then replays every WAL transaction
//! whose commit timestamp follows the snapshot, in `(seq_num, from_ts)`
//! order. Corrupt files are skipped with a warning; a transaction that
//! lost its end marker to a crash is dropped cleanly. Structural
//! inconsistencies inside otherwise-complete records abort startup.
//!
//! Recovery finishes by seeding the logical clock past the newest commit
//! seen and the GID counters past the largest GIDs seen.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use arcstr::ArcStr;
use quiver_common::types::{EdgeTypeId, Gid, LabelId, PropertyId};
use quiver_common::{Error, Result};
use quiver_core::{
    AdjacencyEntry, ConstraintSet, Edge, EdgeRef, GidMap, Indices, NameIdMapper, Vertex,
};

use super::{snapshot, wal};
use crate::config::Config;

/// Everything recovery hands back to `Storage::open`.
pub(crate) struct RecoveredState {
    pub vertices: GidMap<Vertex>,
    pub edges: GidMap<Edge>,
    pub mapper: NameIdMapper,
    pub indices: Indices,
    pub constraints: ConstraintSet,
    /// UUID adopted from disk, or `None` for a fresh storage.
    pub uuid: Option<ArcStr>,
    /// Epoch history including the just-ended epoch.
    pub epoch_history: Vec<(ArcStr, u64)>,
    /// The newest commit timestamp seen anywhere.
    pub last_commit_ts: u64,
    /// Sequence number for the next WAL file.
    pub next_wal_seq: u64,
    pub vertex_count: u64,
    pub edge_count: u64,
}

struct LoadedParts {
    vertices: GidMap<Vertex>,
    edges: GidMap<Edge>,
    mapper: NameIdMapper,
    indices: Indices,
    constraints: ConstraintSet,
    info: Option<snapshot::SnapshotInfo>,
}

/// Recovers the on-disk state under `config.data_dir`.
///
/// # Errors
///
/// Returns [`Error::Recovery`] when WAL replay hits a structural
/// inconsistency, [`Error::Io`] when the directories are unreadable.
pub(crate) fn recover(config: &Config) -> Result<RecoveredState> {
    let parts = load_newest_snapshot(config)?;
    let LoadedParts {
        vertices,
        edges,
        mapper,
        indices,
        constraints,
        info,
    } = parts;

    let snapshot_ts = info.as_ref().map_or(0, |i| i.start_timestamp);
    let mut uuid = info.as_ref().map(|i| i.uuid.clone());
    let mut epoch_history = info
        .as_ref()
        .map(|i| i.epoch_history.clone())
        .unwrap_or_default();

    // Enumerate WAL files, adopting the UUID from disk when no snapshot
    // provided one.
    let mut wal_files: Vec<(u64, u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(config.wal_dir())? {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "wal") {
            continue;
        }
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping unreadable WAL file: {e}");
                continue;
            }
        };
        let header = match wal::read_header(&data) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping corrupt WAL file: {e}");
                continue;
            }
        };
        if let Some(expected) = &uuid {
            if header.uuid != *expected {
                tracing::warn!(
                    path = %path.display(),
                    "skipping WAL file from another storage (uuid mismatch)"
                );
                continue;
            }
        } else {
            uuid = Some(header.uuid.clone());
        }
        wal_files.push((header.seq_num, header.from_ts, path));
    }
    wal_files.sort();

    let next_wal_seq = wal_files.iter().map(|(seq, _, _)| seq + 1).max().unwrap_or(0);

    // Replay.
    let ctx = ReplayContext {
        vertices: &vertices,
        edges: &edges,
        mapper: &mapper,
        indices: &indices,
        constraints: &constraints,
        properties_on_edges: config.properties_on_edges,
    };
    let mut last_commit_ts = snapshot_ts;
    let mut replayed = 0u64;
    for (_, _, path) in &wal_files {
        let (_, entries) = wal::read_file(path)?;
        let mut pending: Vec<wal::WalOp> = Vec::new();
        for (ts, entry) in entries {
            match entry {
                wal::WalEntry::Op(op) => {
                    if is_declaration(&op) {
                        if ts > snapshot_ts {
                            ctx.apply(&op)?;
                            last_commit_ts = last_commit_ts.max(ts);
                        }
                    } else {
                        pending.push(op);
                    }
                }
                wal::WalEntry::TransactionEnd => {
                    if ts > snapshot_ts {
                        for op in &pending {
                            ctx.apply(op)?;
                        }
                        last_commit_ts = last_commit_ts.max(ts);
                        replayed += 1;
                    }
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            tracing::warn!(
                path = %path.display(),
                dropped = pending.len(),
                "dropping transaction without end marker"
            );
        }
    }

    // Close out the epoch the recovered files belonged to.
    if let Some(info) = &info {
        epoch_history.push((info.epoch_id.clone(), last_commit_ts));
    }

    // Seed GID counters past everything recovered.
    let max_vertex = vertices.gids().last().map_or(0, |g| Gid::as_u64(*g));
    vertices.seed_next_gid(max_vertex + 1);
    let mut max_edge = edges.gids().last().map_or(0, |g| Gid::as_u64(*g));
    let mut edge_count = 0u64;
    for (_, vertex) in vertices.iter() {
        let data = vertex.data.read();
        edge_count += data.state.out_edges.len() as u64;
        for entry in &data.state.out_edges {
            max_edge = max_edge.max(entry.edge.gid().as_u64());
        }
    }
    edges.seed_next_gid(max_edge + 1);

    if info.is_some() || replayed > 0 {
        tracing::info!(
            vertices = vertices.len(),
            edges = edge_count,
            transactions_replayed = replayed,
            last_commit_ts,
            "recovery complete"
        );
    }

    let vertex_count = vertices.len() as u64;
    Ok(RecoveredState {
        vertices,
        edges,
        mapper,
        indices,
        constraints,
        uuid,
        epoch_history,
        last_commit_ts,
        next_wal_seq,
        vertex_count,
        edge_count,
    })
}

/// Tries snapshots newest-first until one loads; damage skips to the next
/// with a warning, starting over on fresh structures each time.
fn load_newest_snapshot(config: &Config) -> Result<LoadedParts> {
    let mut paths: Vec<PathBuf> = fs::read_dir(config.snapshots_dir())?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "snapshot"))
        .collect();
    paths.sort();
    paths.reverse();

    for path in &paths {
        let vertices = GidMap::new();
        let edges = GidMap::new();
        let mapper = NameIdMapper::new();
        let indices = Indices::new();
        let constraints = ConstraintSet::new();

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping unreadable snapshot: {e}");
                continue;
            }
        };
        match snapshot::load(
            &data,
            config.properties_on_edges,
            &vertices,
            &edges,
            &mapper,
            &indices,
            &constraints,
        ) {
            Ok(info) => {
                return Ok(LoadedParts {
                    vertices,
                    edges,
                    mapper,
                    indices,
                    constraints,
                    info: Some(info),
                });
            }
            Err(Error::Recovery(reason)) if is_mode_mismatch(&reason) => {
                // A snapshot that genuinely carries edge properties cannot
                // be loaded into a properties-off storage at all.
                return Err(Error::Recovery(reason));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping corrupt snapshot: {e}");
            }
        }
    }

    Ok(LoadedParts {
        vertices: GidMap::new(),
        edges: GidMap::new(),
        mapper: NameIdMapper::new(),
        indices: Indices::new(),
        constraints: ConstraintSet::new(),
        info: None,
    })
}

fn is_mode_mismatch(reason: &str) -> bool {
    reason.contains("properties on edges")
}

fn is_declaration(op: &wal::WalOp) -> bool {
    matches!(
        op,
        wal::WalOp::LabelIndexCreate { .. }
            | wal::WalOp::LabelIndexDrop { .. }
            | wal::WalOp::LabelPropertyIndexCreate { .. }
            | wal::WalOp::LabelPropertyIndexDrop { .. }
            | wal::WalOp::ExistenceConstraintCreate { .. }
            | wal::WalOp::ExistenceConstraintDrop { .. }
            | wal::WalOp::UniqueConstraintCreate { .. }
            | wal::WalOp::UniqueConstraintDrop { .. }
    )
}

struct ReplayContext<'a> {
    vertices: &'a GidMap<Vertex>,
    edges: &'a GidMap<Edge>,
    mapper: &'a NameIdMapper,
    indices: &'a Indices,
    constraints: &'a ConstraintSet,
    properties_on_edges: bool,
}

impl ReplayContext<'_> {
    fn vertex(&self, gid: Gid) -> Result<Arc<Vertex>> {
        self.vertices
            .get(gid)
            .ok_or_else(|| Error::Recovery(format!("WAL references missing vertex {gid}")))
    }

    fn label(&self, name: &str) -> LabelId {
        LabelId::new(self.mapper.name_to_id(name))
    }

    fn property(&self, name: &str) -> PropertyId {
        PropertyId::new(self.mapper.name_to_id(name))
    }

    fn apply(&self, op: &wal::WalOp) -> Result<()> {
        match op {
            wal::WalOp::VertexCreate { gid } => {
                if !self.vertices.insert(*gid, Vertex::new(*gid)) {
                    return Err(Error::Recovery(format!("duplicate vertex {gid} in WAL")));
                }
            }
            wal::WalOp::VertexDelete { gid } => {
                if self.vertices.remove(*gid).is_none() {
                    return Err(Error::Recovery(format!("WAL deletes missing vertex {gid}")));
                }
                self.indices.on_remove_vertex(*gid);
            }
            wal::WalOp::VertexAddLabel { gid, label } => {
                let vertex = self.vertex(*gid)?;
                let label = self.label(label);
                let mut data = vertex.data.write();
                data.state.add_label(label);
                self.indices
                    .on_add_label(label, *gid, &data.state.properties);
            }
            wal::WalOp::VertexRemoveLabel { gid, label } => {
                let vertex = self.vertex(*gid)?;
                let label = self.label(label);
                vertex.data.write().state.remove_label(label);
            }
            wal::WalOp::VertexSetProperty {
                gid,
                property,
                value,
            } => {
                let vertex = self.vertex(*gid)?;
                let property = self.property(property);
                let mut data = vertex.data.write();
                if value.is_null() {
                    data.state.properties.remove(&property);
                } else {
                    data.state.properties.insert(property, value.clone());
                    self.indices
                        .on_set_property(property, *gid, &data.state.labels);
                }
            }
            wal::WalOp::EdgeCreate {
                gid,
                from,
                to,
                edge_type,
            } => {
                let from_v = self.vertex(*from)?;
                let to_v = self.vertex(*to)?;
                let edge_type = EdgeTypeId::new(self.mapper.name_to_id(edge_type));
                let edge_ref = if self.properties_on_edges {
                    let edge = Edge::new(*gid);
                    self.edges.insert(*gid, Arc::clone(&edge));
                    EdgeRef::Handle(edge)
                } else {
                    EdgeRef::Gid(*gid)
                };
                from_v.data.write().state.out_edges.push(AdjacencyEntry {
                    edge_type,
                    vertex: *to,
                    edge: edge_ref.clone(),
                });
                to_v.data.write().state.in_edges.push(AdjacencyEntry {
                    edge_type,
                    vertex: *from,
                    edge: edge_ref,
                });
            }
            wal::WalOp::EdgeDelete { gid, from, to, .. } => {
                let from_v = self.vertex(*from)?;
                let to_v = self.vertex(*to)?;
                if !from_v.data.write().state.remove_out_edge(*gid) {
                    return Err(Error::Recovery(format!("WAL deletes missing edge {gid}")));
                }
                to_v.data.write().state.remove_in_edge(*gid);
                self.edges.remove(*gid);
            }
            wal::WalOp::EdgeSetProperty {
                gid,
                property,
                value,
            } => {
                if !self.properties_on_edges {
                    return Err(Error::Recovery(
                        "WAL carries edge properties, but the storage is configured without \
                         properties on edges"
                            .into(),
                    ));
                }
                let edge = self
                    .edges
                    .get(*gid)
                    .ok_or_else(|| Error::Recovery(format!("WAL references missing edge {gid}")))?;
                let property = self.property(property);
                let mut data = edge.data.write();
                if value.is_null() {
                    data.state.properties.remove(&property);
                } else {
                    data.state.properties.insert(property, value.clone());
                }
            }
            wal::WalOp::LabelIndexCreate { label } => {
                let label = self.label(label);
                if self.indices.create_label_index(label) {
                    self.backfill_label(label);
                }
            }
            wal::WalOp::LabelIndexDrop { label } => {
                self.indices.drop_label_index(self.label(label));
            }
            wal::WalOp::LabelPropertyIndexCreate { label, property } => {
                let label = self.label(label);
                let property = self.property(property);
                if self.indices.create_label_property_index(label, property) {
                    self.backfill_label_property(label, property);
                }
            }
            wal::WalOp::LabelPropertyIndexDrop { label, property } => {
                self.indices
                    .drop_label_property_index(self.label(label), self.property(property));
            }
            wal::WalOp::ExistenceConstraintCreate { label, property } => {
                self.constraints
                    .declare_existence(self.label(label), self.property(property));
            }
            wal::WalOp::ExistenceConstraintDrop { label, property } => {
                self.constraints
                    .drop_existence(self.label(label), self.property(property));
            }
            wal::WalOp::UniqueConstraintCreate { label, properties } => {
                let properties = properties.iter().map(|p| self.property(p)).collect();
                self.constraints.declare_unique(self.label(label), properties);
            }
            wal::WalOp::UniqueConstraintDrop { label, properties } => {
                let properties = properties.iter().map(|p| self.property(p)).collect();
                self.constraints.drop_unique(self.label(label), properties);
            }
        }
        Ok(())
    }

    fn backfill_label(&self, label: LabelId) {
        for (gid, vertex) in self.vertices.iter() {
            let data = vertex.data.read();
            if data.state.has_label(label) {
                self.indices
                    .on_add_label(label, gid, &data.state.properties);
            }
        }
    }

    fn backfill_label_property(&self, label: LabelId, property: PropertyId) {
        for (gid, vertex) in self.vertices.iter() {
            let data = vertex.data.read();
            if data.state.has_label(label) && data.state.properties.contains_key(&property) {
                self.indices.on_set_property(property, gid, &data.state.labels);
            }
        }
    }
}
