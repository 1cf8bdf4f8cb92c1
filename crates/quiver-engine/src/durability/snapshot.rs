//! Point-in-time snapshots.
//!
//! A snapshot is a full dump of the committed state as seen at its start
//! timestamp, in a fixed sectioned layout:
//!
//! 1. magic + format version
//! 2. section offset table (back-patched after the sections are written)
//! 3. edges (only when properties on edges are enabled)
//! 4. vertices, GID-ascending, with both adjacency directions
//! 5. index declarations
//! 6. constraint declarations
//! 7. id-to-name table restricted to referenced ids
//! 8. epoch history
//! 9. metadata (uuid, epoch, start timestamp, record counts)
//!
//! The reader sizes itself from the metadata, splits the edge and vertex
//! sections into non-overlapping byte ranges by skip-scanning record
//! boundaries, and loads the ranges in parallel. A final connectivity pass
//! re-resolves edge references against the freshly loaded maps.

use std::path::Path;
use std::sync::Arc;

use arcstr::ArcStr;
use quiver_common::hash::{FxHashMap, FxHashSet};
use quiver_common::types::{EdgeTypeId, Gid, LabelId, PropertyId};
use quiver_common::{Error, Result};
use quiver_core::{
    AdjacencyEntry, ConstraintSet, Edge, EdgeRef, GidMap, Indices, NameIdMapper, Vertex,
    ViewParams, reconstruct_edge, reconstruct_vertex,
};

use super::encoder::{Decoder, FileEncoder};
use super::{FORMAT_VERSION, SNAPSHOT_MAGIC, marker};

/// How many ranges the parallel loader splits each section into.
const LOAD_PARTITIONS: u64 = 8;

/// Header and metadata of a snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Byte offset of the edges section; zero when edges carry no
    /// properties and the section is absent.
    pub offset_edges: u64,
    /// Byte offset of the vertices section.
    pub offset_vertices: u64,
    /// Byte offset of the index declarations.
    pub offset_indices: u64,
    /// Byte offset of the constraint declarations.
    pub offset_constraints: u64,
    /// Byte offset of the id-to-name table.
    pub offset_mapper: u64,
    /// Byte offset of the epoch history.
    pub offset_epoch_history: u64,
    /// Byte offset of the metadata section.
    pub offset_metadata: u64,
    /// Storage UUID.
    pub uuid: ArcStr,
    /// Epoch that wrote the snapshot.
    pub epoch_id: ArcStr,
    /// The timestamp the dump is consistent at.
    pub start_timestamp: u64,
    /// Number of edge records.
    pub edges_count: u64,
    /// Number of vertex records.
    pub vertices_count: u64,
    /// Epoch history `(epoch_id, last_commit_timestamp)`, oldest first.
    /// Populated by [`load`]; [`read_info`] leaves it empty.
    pub epoch_history: Vec<(ArcStr, u64)>,
}

/// Builds the file name for a snapshot; names sort by start timestamp.
#[must_use]
pub fn snapshot_file_name(start_ts: u64) -> String {
    format!("{start_ts:020}.snapshot")
}

/// Everything the writer needs borrowed from the storage.
pub struct SnapshotWriter<'a> {
    /// Vertex store.
    pub vertices: &'a GidMap<Vertex>,
    /// Edge store.
    pub edges: &'a GidMap<Edge>,
    /// Shared name interner.
    pub mapper: &'a NameIdMapper,
    /// Index declarations.
    pub indices: &'a Indices,
    /// Constraint declarations.
    pub constraints: &'a ConstraintSet,
    /// Visibility of the snapshot transaction (pinned start timestamp).
    pub params: ViewParams,
    /// Storage UUID.
    pub uuid: &'a str,
    /// Current epoch id.
    pub epoch_id: &'a str,
    /// Prior epochs and their last commit timestamps, oldest first.
    pub epoch_history: &'a [(ArcStr, u64)],
    /// The pinned start timestamp.
    pub start_timestamp: u64,
    /// Whether edges carry properties (and get their own section).
    pub properties_on_edges: bool,
}

impl SnapshotWriter<'_> {
    /// Writes the snapshot to `path`, fsyncing before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on any write failure; the caller removes the
    /// partial file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut enc = FileEncoder::create(path)?;
        let mut used_ids = FxHashSet::default();

        enc.write_bytes(SNAPSHOT_MAGIC)?;
        enc.write_u64(FORMAT_VERSION)?;

        enc.write_u8(marker::SECTION_OFFSETS)?;
        let offset_table = enc.position();
        for _ in 0..7 {
            enc.write_u64(0)?;
        }

        // Edges, GID ascending.
        let mut edges_count = 0u64;
        let offset_edges = if self.properties_on_edges {
            let offset = enc.position();
            for (gid, edge) in self.edges.iter() {
                let Some(state) = reconstruct_edge(&edge, &self.params) else {
                    continue;
                };
                enc.write_u8(marker::SECTION_EDGE)?;
                enc.write_u64(gid.as_u64())?;
                enc.write_u64(state.properties.len() as u64)?;
                for (key, value) in &state.properties {
                    used_ids.insert(key.as_u64());
                    enc.write_u64(key.as_u64())?;
                    enc.write_value(value)?;
                }
                edges_count += 1;
            }
            offset
        } else {
            0
        };

        // Vertices, GID ascending.
        let offset_vertices = enc.position();
        let mut vertices_count = 0u64;
        for (gid, vertex) in self.vertices.iter() {
            let Some(state) = reconstruct_vertex(&vertex, &self.params) else {
                continue;
            };
            enc.write_u8(marker::SECTION_VERTEX)?;
            enc.write_u64(gid.as_u64())?;

            let mut labels: Vec<u64> = state.labels.iter().map(|l| l.as_u64()).collect();
            labels.sort_unstable();
            enc.write_u64(labels.len() as u64)?;
            for label in labels {
                used_ids.insert(label);
                enc.write_u64(label)?;
            }

            enc.write_u64(state.properties.len() as u64)?;
            for (key, value) in &state.properties {
                used_ids.insert(key.as_u64());
                enc.write_u64(key.as_u64())?;
                enc.write_value(value)?;
            }

            enc.write_u64(state.in_edges.len() as u64)?;
            for entry in &state.in_edges {
                used_ids.insert(entry.edge_type.as_u64());
                enc.write_u64(entry.edge.gid().as_u64())?;
                enc.write_u64(entry.vertex.as_u64())?;
                enc.write_u64(entry.edge_type.as_u64())?;
            }

            enc.write_u64(state.out_edges.len() as u64)?;
            for entry in &state.out_edges {
                used_ids.insert(entry.edge_type.as_u64());
                enc.write_u64(entry.edge.gid().as_u64())?;
                enc.write_u64(entry.vertex.as_u64())?;
                enc.write_u64(entry.edge_type.as_u64())?;
            }

            if !self.properties_on_edges {
                edges_count += state.out_edges.len() as u64;
            }
            vertices_count += 1;
        }

        // Index declarations.
        let offset_indices = enc.position();
        enc.write_u8(marker::SECTION_INDICES)?;
        let label_indices = self.indices.label_indices();
        enc.write_u64(label_indices.len() as u64)?;
        for label in label_indices {
            used_ids.insert(label.as_u64());
            enc.write_u64(label.as_u64())?;
        }
        let lp_indices = self.indices.label_property_indices();
        enc.write_u64(lp_indices.len() as u64)?;
        for (label, property) in lp_indices {
            used_ids.insert(label.as_u64());
            used_ids.insert(property.as_u64());
            enc.write_u64(label.as_u64())?;
            enc.write_u64(property.as_u64())?;
        }

        // Constraint declarations.
        let offset_constraints = enc.position();
        enc.write_u8(marker::SECTION_CONSTRAINTS)?;
        let existence = self.constraints.existence_constraints();
        enc.write_u64(existence.len() as u64)?;
        for (label, property) in existence {
            used_ids.insert(label.as_u64());
            used_ids.insert(property.as_u64());
            enc.write_u64(label.as_u64())?;
            enc.write_u64(property.as_u64())?;
        }
        let unique = self.constraints.unique_constraints();
        enc.write_u64(unique.len() as u64)?;
        for (label, properties) in unique {
            used_ids.insert(label.as_u64());
            enc.write_u64(label.as_u64())?;
            enc.write_u64(properties.len() as u64)?;
            for property in properties {
                used_ids.insert(property.as_u64());
                enc.write_u64(property.as_u64())?;
            }
        }

        // Name table, restricted to referenced ids.
        let offset_mapper = enc.position();
        enc.write_u8(marker::SECTION_MAPPER)?;
        let mut ids: Vec<u64> = used_ids.into_iter().collect();
        ids.sort_unstable();
        enc.write_u64(ids.len() as u64)?;
        for id in ids {
            let name = self
                .mapper
                .id_to_name(id)
                .ok_or_else(|| Error::Recovery(format!("dangling interned id {id}")))?;
            enc.write_u64(id)?;
            enc.write_string(&name)?;
        }

        // Epoch history, oldest first, current epoch last.
        let offset_epoch_history = enc.position();
        enc.write_u8(marker::SECTION_EPOCH_HISTORY)?;
        enc.write_u64(self.epoch_history.len() as u64)?;
        for (epoch, last_commit) in self.epoch_history {
            enc.write_string(epoch)?;
            enc.write_u64(*last_commit)?;
        }

        // Metadata.
        let offset_metadata = enc.position();
        enc.write_u8(marker::SECTION_METADATA)?;
        enc.write_string(self.uuid)?;
        enc.write_string(self.epoch_id)?;
        enc.write_u64(self.start_timestamp)?;
        enc.write_u64(edges_count)?;
        enc.write_u64(vertices_count)?;

        // Back-patch the offset table.
        enc.set_position(offset_table)?;
        enc.write_u64(offset_edges)?;
        enc.write_u64(offset_vertices)?;
        enc.write_u64(offset_indices)?;
        enc.write_u64(offset_constraints)?;
        enc.write_u64(offset_mapper)?;
        enc.write_u64(offset_epoch_history)?;
        enc.write_u64(offset_metadata)?;
        enc.sync()?;

        tracing::info!(
            path = %path.display(),
            vertices = vertices_count,
            edges = edges_count,
            start_timestamp = self.start_timestamp,
            "snapshot written"
        );
        Ok(())
    }
}

/// Reads the header, offset table, and metadata of a snapshot.
///
/// # Errors
///
/// Returns [`Error::Recovery`] for bad magic, unsupported version, or
/// offsets pointing outside the file.
pub fn read_info(data: &[u8]) -> Result<SnapshotInfo> {
    if data.len() < SNAPSHOT_MAGIC.len() || &data[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(Error::Recovery("bad snapshot magic".into()));
    }
    let mut dec = Decoder::new(data);
    dec.set_position(SNAPSHOT_MAGIC.len() as u64)?;
    let version = dec.read_u64()?;
    if version != FORMAT_VERSION {
        return Err(Error::Recovery(format!(
            "unsupported snapshot version {version}"
        )));
    }

    dec.expect_marker(marker::SECTION_OFFSETS)?;
    let size = data.len() as u64;
    let mut read_offset = || -> Result<u64> {
        let offset = dec.read_u64()?;
        if offset > size {
            return Err(Error::Recovery("section offset past end of file".into()));
        }
        Ok(offset)
    };
    let offset_edges = read_offset()?;
    let offset_vertices = read_offset()?;
    let offset_indices = read_offset()?;
    let offset_constraints = read_offset()?;
    let offset_mapper = read_offset()?;
    let offset_epoch_history = read_offset()?;
    let offset_metadata = read_offset()?;

    dec.set_position(offset_metadata)?;
    dec.expect_marker(marker::SECTION_METADATA)?;
    let uuid = dec.read_string()?;
    let epoch_id = dec.read_string()?;
    let start_timestamp = dec.read_u64()?;
    let edges_count = dec.read_u64()?;
    let vertices_count = dec.read_u64()?;

    Ok(SnapshotInfo {
        offset_edges,
        offset_vertices,
        offset_indices,
        offset_constraints,
        offset_mapper,
        offset_epoch_history,
        offset_metadata,
        uuid,
        epoch_id,
        start_timestamp,
        edges_count,
        vertices_count,
        epoch_history: Vec::new(),
    })
}

/// Byte offset of the `n`-th edge record, counting from the section start.
fn nth_edge_start_offset(data: &[u8], section_start: u64, n: u64) -> Result<u64> {
    let mut dec = Decoder::new(data);
    dec.set_position(section_start)?;
    for _ in 0..n {
        dec.expect_marker(marker::SECTION_EDGE)?;
        dec.read_u64()?; // gid
        let props = dec.read_u64()?;
        for _ in 0..props {
            dec.read_u64()?; // key
            dec.skip_value()?;
        }
    }
    Ok(dec.position())
}

/// Byte offset and GID of the `n`-th vertex record.
fn nth_vertex_start_offset_and_gid(
    data: &[u8],
    section_start: u64,
    n: u64,
) -> Result<(u64, Gid)> {
    let mut dec = Decoder::new(data);
    dec.set_position(section_start)?;
    for _ in 0..n {
        skip_vertex_record(&mut dec)?;
    }
    let offset = dec.position();
    dec.expect_marker(marker::SECTION_VERTEX)?;
    let gid = Gid::new(dec.read_u64()?);
    Ok((offset, gid))
}

fn skip_vertex_record(dec: &mut Decoder<'_>) -> Result<()> {
    dec.expect_marker(marker::SECTION_VERTEX)?;
    dec.read_u64()?; // gid
    let labels = dec.read_u64()?;
    for _ in 0..labels {
        dec.read_u64()?;
    }
    let props = dec.read_u64()?;
    for _ in 0..props {
        dec.read_u64()?;
        dec.skip_value()?;
    }
    for _ in 0..2 {
        let entries = dec.read_u64()?;
        for _ in 0..entries {
            dec.read_u64()?;
            dec.read_u64()?;
            dec.read_u64()?;
        }
    }
    Ok(())
}

/// Splits `count` records into at most [`LOAD_PARTITIONS`] contiguous
/// `(first_index, len)` chunks.
fn partition(count: u64) -> Vec<(u64, u64)> {
    if count == 0 {
        return Vec::new();
    }
    let parts = LOAD_PARTITIONS.min(count);
    let base = count / parts;
    let extra = count % parts;
    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let len = base + u64::from(i < extra);
        ranges.push((start, len));
        start += len;
    }
    ranges
}

fn translate(
    table: &FxHashMap<u64, u64>,
    old_id: u64,
) -> Result<u64> {
    table
        .get(&old_id)
        .copied()
        .ok_or_else(|| Error::Recovery(format!("snapshot references unmapped id {old_id}")))
}

/// Loads a snapshot into freshly created storage structures.
///
/// Persisted ids are translated through the rebuilt interner, edge and
/// vertex ranges load in parallel, and the GID counters of both maps are
/// seeded past the maxima seen.
///
/// # Errors
///
/// Returns [`Error::Recovery`] on structural damage, or when the snapshot
/// carries edge properties and `properties_on_edges` is off.
pub fn load(
    data: &[u8],
    properties_on_edges: bool,
    vertices: &GidMap<Vertex>,
    edges: &GidMap<Edge>,
    mapper: &NameIdMapper,
    indices: &Indices,
    constraints: &ConstraintSet,
) -> Result<SnapshotInfo> {
    let mut info = read_info(data)?;

    // Epoch history.
    {
        let mut dec = Decoder::new(data);
        dec.set_position(info.offset_epoch_history)?;
        dec.expect_marker(marker::SECTION_EPOCH_HISTORY)?;
        let count = dec.read_u64()?;
        for _ in 0..count {
            let epoch = dec.read_string()?;
            let last_commit = dec.read_u64()?;
            info.epoch_history.push((epoch, last_commit));
        }
    }

    // Rebuild the interner and the old-to-new id translation.
    let mut translation: FxHashMap<u64, u64> = FxHashMap::default();
    {
        let mut dec = Decoder::new(data);
        dec.set_position(info.offset_mapper)?;
        dec.expect_marker(marker::SECTION_MAPPER)?;
        let count = dec.read_u64()?;
        for _ in 0..count {
            let old_id = dec.read_u64()?;
            let name = dec.read_string()?;
            translation.insert(old_id, mapper.name_to_id(&name));
        }
    }

    // Index and constraint declarations.
    {
        let mut dec = Decoder::new(data);
        dec.set_position(info.offset_indices)?;
        dec.expect_marker(marker::SECTION_INDICES)?;
        let labels = dec.read_u64()?;
        for _ in 0..labels {
            let label = translate(&translation, dec.read_u64()?)?;
            indices.create_label_index(LabelId::new(label));
        }
        let pairs = dec.read_u64()?;
        for _ in 0..pairs {
            let label = translate(&translation, dec.read_u64()?)?;
            let property = translate(&translation, dec.read_u64()?)?;
            indices.create_label_property_index(LabelId::new(label), PropertyId::new(property));
        }

        dec.set_position(info.offset_constraints)?;
        dec.expect_marker(marker::SECTION_CONSTRAINTS)?;
        let existence = dec.read_u64()?;
        for _ in 0..existence {
            let label = translate(&translation, dec.read_u64()?)?;
            let property = translate(&translation, dec.read_u64()?)?;
            constraints.declare_existence(LabelId::new(label), PropertyId::new(property));
        }
        let unique = dec.read_u64()?;
        for _ in 0..unique {
            let label = translate(&translation, dec.read_u64()?)?;
            let count = dec.read_u64()?;
            let mut properties = Vec::with_capacity(count as usize);
            for _ in 0..count {
                properties.push(PropertyId::new(translate(&translation, dec.read_u64()?)?));
            }
            constraints.declare_unique(LabelId::new(label), properties);
        }
    }

    use rayon::prelude::*;

    // Edges, in parallel ranges.
    if info.offset_edges != 0 {
        let ranges = partition(info.edges_count);
        let offsets: Vec<u64> = ranges
            .iter()
            .map(|(first, _)| nth_edge_start_offset(data, info.offset_edges, *first))
            .collect::<Result<_>>()?;

        ranges
            .par_iter()
            .zip(offsets.par_iter())
            .map(|((_, len), offset)| {
                load_edge_range(data, *offset, *len, properties_on_edges, edges, &translation)
            })
            .collect::<Result<Vec<_>>>()?;
    }

    // Vertices without adjacency, in parallel ranges.
    let vertex_ranges = partition(info.vertices_count);
    let vertex_offsets: Vec<u64> = vertex_ranges
        .iter()
        .map(|(first, _)| {
            nth_vertex_start_offset_and_gid(data, info.offset_vertices, *first).map(|(o, _)| o)
        })
        .collect::<Result<_>>()?;

    vertex_ranges
        .par_iter()
        .zip(vertex_offsets.par_iter())
        .map(|((_, len), offset)| load_vertex_range(data, *offset, *len, vertices, &translation))
        .collect::<Result<Vec<_>>>()?;

    // Connectivity pass: resolve adjacency now that both maps exist.
    vertex_ranges
        .par_iter()
        .zip(vertex_offsets.par_iter())
        .map(|((_, len), offset)| {
            load_connectivity_range(
                data,
                *offset,
                *len,
                properties_on_edges,
                vertices,
                edges,
                &translation,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    // Rebuild declared index entries from the loaded vertices.
    for (gid, vertex) in vertices.iter() {
        let state = vertex.data.read().state.clone();
        indices.populate_from(gid, &state);
    }

    // Seed GID counters past everything seen.
    let max_vertex = vertices.gids().last().map_or(0, |g| Gid::as_u64(*g));
    let max_edge = edges
        .gids()
        .last()
        .map_or(0, |g| Gid::as_u64(*g))
        .max(max_edge_gid_in_adjacency(vertices));
    vertices.seed_next_gid(max_vertex + 1);
    edges.seed_next_gid(max_edge + 1);

    tracing::info!(
        vertices = info.vertices_count,
        edges = info.edges_count,
        start_timestamp = info.start_timestamp,
        "snapshot loaded"
    );
    Ok(info)
}

fn max_edge_gid_in_adjacency(vertices: &GidMap<Vertex>) -> u64 {
    let mut max = 0;
    for (_, vertex) in vertices.iter() {
        let data = vertex.data.read();
        for entry in data.state.out_edges.iter() {
            max = max.max(entry.edge.gid().as_u64());
        }
    }
    max
}

fn load_edge_range(
    data: &[u8],
    offset: u64,
    len: u64,
    properties_on_edges: bool,
    edges: &GidMap<Edge>,
    translation: &FxHashMap<u64, u64>,
) -> Result<()> {
    let mut dec = Decoder::new(data);
    dec.set_position(offset)?;
    let mut last_gid = None;
    for _ in 0..len {
        dec.expect_marker(marker::SECTION_EDGE)?;
        let gid = Gid::new(dec.read_u64()?);
        if last_gid.is_some_and(|last| gid <= last) {
            return Err(Error::Recovery("edge records out of GID order".into()));
        }
        last_gid = Some(gid);

        let props = dec.read_u64()?;
        if !properties_on_edges {
            if props != 0 {
                return Err(Error::Recovery(
                    "snapshot has properties on edges, but the storage is configured without \
                     properties on edges"
                        .into(),
                ));
            }
            continue;
        }

        let edge = Edge::new(gid);
        {
            let mut edge_data = edge.data.write();
            for _ in 0..props {
                let key = translate(translation, dec.read_u64()?)?;
                let value = dec.read_value()?;
                edge_data.state.properties.insert(PropertyId::new(key), value);
            }
        }
        if !edges.insert(gid, edge) {
            return Err(Error::Recovery(format!("duplicate edge gid {gid}")));
        }
    }
    Ok(())
}

fn load_vertex_range(
    data: &[u8],
    offset: u64,
    len: u64,
    vertices: &GidMap<Vertex>,
    translation: &FxHashMap<u64, u64>,
) -> Result<()> {
    let mut dec = Decoder::new(data);
    dec.set_position(offset)?;
    let mut last_gid = None;
    for _ in 0..len {
        dec.expect_marker(marker::SECTION_VERTEX)?;
        let gid = Gid::new(dec.read_u64()?);
        if last_gid.is_some_and(|last| gid <= last) {
            return Err(Error::Recovery("vertex records out of GID order".into()));
        }
        last_gid = Some(gid);

        let vertex = Vertex::new(gid);
        {
            let mut vertex_data = vertex.data.write();
            let labels = dec.read_u64()?;
            for _ in 0..labels {
                let label = translate(translation, dec.read_u64()?)?;
                vertex_data.state.add_label(LabelId::new(label));
            }
            let props = dec.read_u64()?;
            for _ in 0..props {
                let key = translate(translation, dec.read_u64()?)?;
                let value = dec.read_value()?;
                vertex_data
                    .state
                    .properties
                    .insert(PropertyId::new(key), value);
            }
        }

        // Adjacency is resolved by the connectivity pass.
        for _ in 0..2 {
            let entries = dec.read_u64()?;
            for _ in 0..entries {
                dec.read_u64()?;
                dec.read_u64()?;
                dec.read_u64()?;
            }
        }

        if !vertices.insert(gid, vertex) {
            return Err(Error::Recovery(format!("duplicate vertex gid {gid}")));
        }
    }
    Ok(())
}

fn load_connectivity_range(
    data: &[u8],
    offset: u64,
    len: u64,
    properties_on_edges: bool,
    vertices: &GidMap<Vertex>,
    edges: &GidMap<Edge>,
    translation: &FxHashMap<u64, u64>,
) -> Result<()> {
    let mut dec = Decoder::new(data);
    dec.set_position(offset)?;
    for _ in 0..len {
        dec.expect_marker(marker::SECTION_VERTEX)?;
        let gid = Gid::new(dec.read_u64()?);
        let vertex = vertices
            .get(gid)
            .ok_or_else(|| Error::Recovery(format!("vertex {gid} vanished during load")))?;

        let labels = dec.read_u64()?;
        for _ in 0..labels {
            dec.read_u64()?;
        }
        let props = dec.read_u64()?;
        for _ in 0..props {
            dec.read_u64()?;
            dec.skip_value()?;
        }

        let mut resolve = |dec: &mut Decoder<'_>| -> Result<(Gid, Gid, EdgeTypeId)> {
            let edge_gid = Gid::new(dec.read_u64()?);
            let peer_gid = Gid::new(dec.read_u64()?);
            let edge_type = EdgeTypeId::new(translate(translation, dec.read_u64()?)?);
            Ok((edge_gid, peer_gid, edge_type))
        };

        let mut vertex_data = vertex.data.write();
        let in_count = dec.read_u64()?;
        for _ in 0..in_count {
            let (edge_gid, peer_gid, edge_type) = resolve(&mut dec)?;
            vertex_data.state.in_edges.push(AdjacencyEntry {
                edge_type,
                vertex: peer_gid,
                edge: edge_ref_for(edge_gid, properties_on_edges, edges)?,
            });
        }
        let out_count = dec.read_u64()?;
        for _ in 0..out_count {
            let (edge_gid, peer_gid, edge_type) = resolve(&mut dec)?;
            vertex_data.state.out_edges.push(AdjacencyEntry {
                edge_type,
                vertex: peer_gid,
                edge: edge_ref_for(edge_gid, properties_on_edges, edges)?,
            });
        }
    }
    Ok(())
}

fn edge_ref_for(
    edge_gid: Gid,
    properties_on_edges: bool,
    edges: &GidMap<Edge>,
) -> Result<EdgeRef> {
    if !properties_on_edges {
        return Ok(EdgeRef::Gid(edge_gid));
    }
    if let Some(edge) = edges.get(edge_gid) {
        return Ok(EdgeRef::Handle(edge));
    }
    // Snapshot written without an edge section (properties were off at
    // write time); materialize the record now. A concurrent loader may win
    // the insert race, in which case its record is the one to share.
    let edge = Edge::new(edge_gid);
    edges.insert(edge_gid, Arc::clone(&edge));
    Ok(EdgeRef::Handle(edges.get(edge_gid).unwrap_or(edge)))
}
