//! The transactional accessor API.
//!
//! An [`Accessor`] owns one transaction. Every mutation conflict-checks the
//! object's chain head, installs the inverse delta, applies the forward
//! change, and records the forward operation for the WAL. Commit validates
//! constraints, appends to the WAL, and re-stamps every delta with the
//! commit timestamp in one atomic store; abort undoes the deltas in
//! reverse install order.
//!
//! Dropping an accessor with an unfinished transaction aborts it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use arcstr::ArcStr;
use parking_lot::Mutex;
use quiver_common::hash::FxHashSet;
use quiver_common::types::{
    EdgeTypeId, Gid, IsolationLevel, LabelId, PropertyId, PropertyValue, StorageMode, View,
};
use quiver_common::{Error, Result, error::ConstraintKind};
use quiver_core::delta::{DeltaAction, ObjectRef, is_transaction_id};
use quiver_core::edge::{Edge, EdgeRef};
use quiver_core::vertex::{AdjacencyEntry, Vertex, VertexData};
use quiver_core::visibility::{
    ViewParams, apply_edge_delta, apply_vertex_delta, reconstruct_edge, reconstruct_vertex,
};
use quiver_core::ConstraintSet;

use crate::durability::{Encoder, WalOp};
use crate::storage::StorageInner;
use crate::transaction::{CommittedTransaction, Transaction};

/// A transactional handle over the storage.
pub struct Accessor {
    inner: Arc<StorageInner>,
    txn: Mutex<Transaction>,
}

impl Accessor {
    pub(crate) fn begin(inner: Arc<StorageInner>, isolation: IsolationLevel) -> Self {
        // Under the engine lock: a start timestamp issued here is above
        // every commit that has finished re-stamping, and below none.
        let (start_ts, id) = {
            let _guard = inner.engine_lock.lock();
            let start_ts = inner.next_timestamp();
            let id = inner.next_transaction_id();
            inner.live.register(start_ts, id);
            (start_ts, id)
        };
        let txn = Transaction::new(id, start_ts, isolation, inner.config.storage_mode);
        Self {
            inner,
            txn: Mutex::new(txn),
        }
    }

    // === Name interning ===

    /// Interns (or looks up) a label name.
    #[must_use]
    pub fn label_id(&self, name: &str) -> LabelId {
        LabelId::new(self.inner.mapper.name_to_id(name))
    }

    /// Interns (or looks up) a property key name.
    #[must_use]
    pub fn property_id(&self, name: &str) -> PropertyId {
        PropertyId::new(self.inner.mapper.name_to_id(name))
    }

    /// Interns (or looks up) an edge type name.
    #[must_use]
    pub fn edge_type_id(&self, name: &str) -> EdgeTypeId {
        EdgeTypeId::new(self.inner.mapper.name_to_id(name))
    }

    /// The name behind a label id.
    #[must_use]
    pub fn label_name(&self, label: LabelId) -> Option<ArcStr> {
        self.inner.mapper.id_to_name(label.as_u64())
    }

    /// The name behind a property id.
    #[must_use]
    pub fn property_name(&self, property: PropertyId) -> Option<ArcStr> {
        self.inner.mapper.id_to_name(property.as_u64())
    }

    /// The name behind an edge type id.
    #[must_use]
    pub fn edge_type_name(&self, edge_type: EdgeTypeId) -> Option<ArcStr> {
        self.inner.mapper.id_to_name(edge_type.as_u64())
    }

    fn params(&self, txn: &Transaction, view: View) -> ViewParams {
        txn.view_params(view, self.inner.current_timestamp())
    }

    // === Vertex operations ===

    /// Creates a vertex visible only to this transaction until commit.
    #[must_use]
    pub fn create_vertex(&self) -> VertexAccessor<'_> {
        let mut txn = self.txn.lock();
        let gid = self.inner.vertices.allocate_gid();
        let vertex = Vertex::new(gid);

        if txn.mode == StorageMode::InMemoryTransactional {
            // The inverse of creation: walking this delta deletes the
            // object, which is exactly what other transactions must see.
            let delta = txn.make_delta(DeltaAction::DeleteObject);
            vertex.data.write().delta = Some(Arc::clone(&delta));
            txn.track(ObjectRef::Vertex(Arc::clone(&vertex)), delta);
            txn.ops.push(WalOp::VertexCreate { gid });
        } else {
            self.inner.vertex_count.fetch_add(1, Ordering::Relaxed);
        }

        self.inner.vertices.insert(gid, Arc::clone(&vertex));
        drop(txn);
        VertexAccessor { vertex, acc: self }
    }

    /// Finds a vertex by GID, honoring the visibility rule.
    #[must_use]
    pub fn find_vertex(&self, gid: Gid, view: View) -> Option<VertexAccessor<'_>> {
        let vertex = self.inner.vertices.get(gid)?;
        let txn = self.txn.lock();
        let params = self.params(&txn, view);
        drop(txn);
        reconstruct_vertex(&vertex, &params)?;
        Some(VertexAccessor { vertex, acc: self })
    }

    /// Lazily iterates all visible vertices in GID order.
    #[must_use]
    pub fn vertices(&self, view: View) -> VertexStream<'_> {
        VertexStream {
            acc: self,
            view,
            source: StreamSource::Scan { last: None },
            filter: None,
        }
    }

    /// Lazily iterates visible vertices carrying `label`. Uses the label
    /// index when one is declared, otherwise scans.
    #[must_use]
    pub fn vertices_by_label(&self, label: LabelId, view: View) -> VertexStream<'_> {
        let source = match self.inner.indices.label_entries(label) {
            Some(gids) => StreamSource::Fixed { gids, pos: 0 },
            None => StreamSource::Scan { last: None },
        };
        VertexStream {
            acc: self,
            view,
            source,
            filter: Some(StreamFilter {
                label,
                property: None,
            }),
        }
    }

    /// Lazily iterates visible vertices carrying `label` whose `property`
    /// equals `value`. Uses the label+property index when declared.
    #[must_use]
    pub fn vertices_by_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        view: View,
    ) -> VertexStream<'_> {
        let source = match self.inner.indices.label_property_entries(label, property) {
            Some(gids) => StreamSource::Fixed { gids, pos: 0 },
            None => StreamSource::Scan { last: None },
        };
        VertexStream {
            acc: self,
            view,
            source,
            filter: Some(StreamFilter {
                label,
                property: Some((property, value)),
            }),
        }
    }

    /// Deletes a vertex with no incident edges.
    ///
    /// # Errors
    ///
    /// [`Error::VertexHasEdges`] when any visible edge is incident,
    /// [`Error::Serialization`] on a write conflict, [`Error::NotFound`]
    /// when the vertex is already gone.
    pub fn delete_vertex(&self, vertex: &VertexAccessor<'_>) -> Result<()> {
        let mut txn = self.txn.lock();
        let target = &vertex.vertex;
        let mut data = target.data.write();
        check_write(&txn, &data)?;
        if data.state.deleted {
            return Err(Error::NotFound);
        }
        if !data.state.in_edges.is_empty() || !data.state.out_edges.is_empty() {
            return Err(Error::VertexHasEdges);
        }

        if txn.mode == StorageMode::InMemoryTransactional {
            install_vertex_delta(&mut txn, target, &mut data, DeltaAction::RecreateObject);
            data.state.deleted = true;
            txn.ops.push(WalOp::VertexDelete { gid: target.gid });
        } else {
            data.state.deleted = true;
            drop(data);
            self.inner.vertices.remove(target.gid);
            self.inner.indices.on_remove_vertex(target.gid);
            self.inner.vertex_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Deletes a vertex together with every incident edge, returning the
    /// deleted edges.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on a write conflict, [`Error::NotFound`]
    /// when the vertex is already gone.
    pub fn detach_delete_vertex(
        &self,
        vertex: &VertexAccessor<'_>,
    ) -> Result<Vec<EdgeAccessor<'_>>> {
        let target = &vertex.vertex;

        // Snapshot the adjacency under the lock, then delete the edges one
        // by one; each deletion re-locks and conflict-checks its endpoints.
        let (in_entries, out_entries) = {
            let txn = self.txn.lock();
            let data = target.data.read();
            check_write(&txn, &data)?;
            if data.state.deleted {
                return Err(Error::NotFound);
            }
            (data.state.in_edges.clone(), data.state.out_edges.clone())
        };

        let mut deleted = Vec::new();
        let mut gone = FxHashSet::default();
        for entry in &out_entries {
            let to = self
                .inner
                .vertices
                .get(entry.vertex)
                .ok_or(Error::NotFound)?;
            let edge = EdgeAccessor {
                acc: self,
                edge: entry.edge.clone(),
                edge_type: entry.edge_type,
                from: Arc::clone(target),
                to,
            };
            self.delete_edge(&edge)?;
            gone.insert(edge.gid());
            deleted.push(edge);
        }
        for entry in &in_entries {
            // A self-loop already went out through the out_edges pass.
            if gone.contains(&entry.edge.gid()) {
                continue;
            }
            let from = self
                .inner
                .vertices
                .get(entry.vertex)
                .ok_or(Error::NotFound)?;
            let edge = EdgeAccessor {
                acc: self,
                edge: entry.edge.clone(),
                edge_type: entry.edge_type,
                from,
                to: Arc::clone(target),
            };
            self.delete_edge(&edge)?;
            deleted.push(edge);
        }

        self.delete_vertex(vertex)?;
        Ok(deleted)
    }

    /// Adds a label to a vertex. Returns `false` if it was already there.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on conflict, [`Error::NotFound`] when the
    /// vertex is deleted in this view.
    pub fn add_label(&self, vertex: &VertexAccessor<'_>, label: LabelId) -> Result<bool> {
        let mut txn = self.txn.lock();
        let target = &vertex.vertex;
        let mut data = target.data.write();
        check_write(&txn, &data)?;
        if data.state.deleted {
            return Err(Error::NotFound);
        }
        if data.state.has_label(label) {
            return Ok(false);
        }

        if txn.mode == StorageMode::InMemoryTransactional {
            install_vertex_delta(&mut txn, target, &mut data, DeltaAction::RemoveLabel(label));
            txn.ops.push(WalOp::VertexAddLabel {
                gid: target.gid,
                label: self
                    .inner
                    .mapper
                    .id_to_name(label.as_u64())
                    .unwrap_or_default(),
            });
        }
        data.state.add_label(label);
        self.inner
            .indices
            .on_add_label(label, target.gid, &data.state.properties);
        Ok(true)
    }

    /// Removes a label from a vertex. Returns `false` if it was absent.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on conflict, [`Error::NotFound`] when the
    /// vertex is deleted in this view.
    pub fn remove_label(&self, vertex: &VertexAccessor<'_>, label: LabelId) -> Result<bool> {
        let mut txn = self.txn.lock();
        let target = &vertex.vertex;
        let mut data = target.data.write();
        check_write(&txn, &data)?;
        if data.state.deleted {
            return Err(Error::NotFound);
        }
        if !data.state.has_label(label) {
            return Ok(false);
        }

        if txn.mode == StorageMode::InMemoryTransactional {
            install_vertex_delta(&mut txn, target, &mut data, DeltaAction::AddLabel(label));
            txn.ops.push(WalOp::VertexRemoveLabel {
                gid: target.gid,
                label: self
                    .inner
                    .mapper
                    .id_to_name(label.as_u64())
                    .unwrap_or_default(),
            });
        }
        data.state.remove_label(label);
        Ok(true)
    }

    /// Writes a vertex property (`Null` clears it) and returns the old
    /// value.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on conflict, [`Error::NotFound`] when the
    /// vertex is deleted, [`Error::PropertyValueTooLarge`] past the cap.
    pub fn set_property(
        &self,
        vertex: &VertexAccessor<'_>,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<PropertyValue> {
        self.ensure_value_size(&value)?;
        let mut txn = self.txn.lock();
        let target = &vertex.vertex;
        let mut data = target.data.write();
        check_write(&txn, &data)?;
        if data.state.deleted {
            return Err(Error::NotFound);
        }

        let old = data
            .state
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null);

        if txn.mode == StorageMode::InMemoryTransactional {
            install_vertex_delta(
                &mut txn,
                target,
                &mut data,
                DeltaAction::SetProperty {
                    key: property,
                    value: old.clone(),
                },
            );
            txn.ops.push(WalOp::VertexSetProperty {
                gid: target.gid,
                property: self
                    .inner
                    .mapper
                    .id_to_name(property.as_u64())
                    .unwrap_or_default(),
                value: value.clone(),
            });
        }

        if value.is_null() {
            data.state.properties.remove(&property);
        } else {
            data.state.properties.insert(property, value);
            self.inner
                .indices
                .on_set_property(property, target.gid, &data.state.labels);
        }
        Ok(old)
    }

    /// Clears a vertex property; returns the old value.
    ///
    /// # Errors
    ///
    /// Same as [`set_property`](Self::set_property).
    pub fn remove_property(
        &self,
        vertex: &VertexAccessor<'_>,
        property: PropertyId,
    ) -> Result<PropertyValue> {
        self.set_property(vertex, property, PropertyValue::Null)
    }

    // === Edge operations ===

    /// Creates an edge between two visible vertices.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on conflict with a concurrent writer on
    /// either endpoint, [`Error::NotFound`] when an endpoint is deleted.
    pub fn create_edge(
        &self,
        from: &VertexAccessor<'_>,
        to: &VertexAccessor<'_>,
        edge_type: EdgeTypeId,
    ) -> Result<EdgeAccessor<'_>> {
        let mut txn = self.txn.lock();
        let from_v = &from.vertex;
        let to_v = &to.vertex;

        // The record is allocated and published only after both endpoint
        // checks pass, so a failed create leaves nothing behind.
        let make_edge_ref = |inner: &StorageInner| {
            let gid = inner.edges.allocate_gid();
            if inner.config.properties_on_edges {
                let edge = Edge::new(gid);
                inner.edges.insert(gid, Arc::clone(&edge));
                EdgeRef::Handle(edge)
            } else {
                EdgeRef::Gid(gid)
            }
        };

        let edge_ref;
        if from_v.gid == to_v.gid {
            // Self-loop: one lock covers both directions.
            let mut data = from_v.data.write();
            check_write(&txn, &data)?;
            if data.state.deleted {
                return Err(Error::NotFound);
            }
            edge_ref = make_edge_ref(&self.inner);
            self.link_edge(
                &mut txn,
                from_v,
                &mut data,
                edge_type,
                to_v.gid,
                &edge_ref,
                Direction::Out,
            );
            self.link_edge(
                &mut txn,
                from_v,
                &mut data,
                edge_type,
                from_v.gid,
                &edge_ref,
                Direction::In,
            );
        } else {
            let (mut from_data, mut to_data) = if from_v.gid < to_v.gid {
                let f = from_v.data.write();
                let t = to_v.data.write();
                (f, t)
            } else {
                let t = to_v.data.write();
                let f = from_v.data.write();
                (f, t)
            };
            check_write(&txn, &from_data)?;
            check_write(&txn, &to_data)?;
            if from_data.state.deleted || to_data.state.deleted {
                return Err(Error::NotFound);
            }
            edge_ref = make_edge_ref(&self.inner);
            self.link_edge(
                &mut txn,
                from_v,
                &mut from_data,
                edge_type,
                to_v.gid,
                &edge_ref,
                Direction::Out,
            );
            self.link_edge(
                &mut txn,
                to_v,
                &mut to_data,
                edge_type,
                from_v.gid,
                &edge_ref,
                Direction::In,
            );
        }

        if txn.mode == StorageMode::InMemoryTransactional {
            if let EdgeRef::Handle(edge) = &edge_ref {
                let delta = txn.make_delta(DeltaAction::DeleteObject);
                edge.data.write().delta = Some(Arc::clone(&delta));
                txn.track(ObjectRef::Edge(Arc::clone(edge)), delta);
            }
            txn.ops.push(WalOp::EdgeCreate {
                gid: edge_ref.gid(),
                from: from_v.gid,
                to: to_v.gid,
                edge_type: self
                    .inner
                    .mapper
                    .id_to_name(edge_type.as_u64())
                    .unwrap_or_default(),
            });
        } else {
            self.inner.edge_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(EdgeAccessor {
            acc: self,
            edge: edge_ref,
            edge_type,
            from: Arc::clone(from_v),
            to: Arc::clone(to_v),
        })
    }

    /// Deletes an edge, detaching it from both endpoints.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] on conflict, [`Error::NotFound`] when the
    /// edge is already gone in this view.
    pub fn delete_edge(&self, edge: &EdgeAccessor<'_>) -> Result<()> {
        let mut txn = self.txn.lock();
        let from_v = &edge.from;
        let to_v = &edge.to;
        let gid = edge.edge.gid();

        if from_v.gid == to_v.gid {
            let mut data = from_v.data.write();
            check_write(&txn, &data)?;
            if !data.state.out_edges.iter().any(|e| e.edge.gid() == gid) {
                return Err(Error::NotFound);
            }
            self.unlink_edge(&mut txn, from_v, &mut data, edge, Direction::Out);
            self.unlink_edge(&mut txn, from_v, &mut data, edge, Direction::In);
        } else {
            let (mut from_data, mut to_data) = if from_v.gid < to_v.gid {
                let f = from_v.data.write();
                let t = to_v.data.write();
                (f, t)
            } else {
                let t = to_v.data.write();
                let f = from_v.data.write();
                (f, t)
            };
            check_write(&txn, &from_data)?;
            check_write(&txn, &to_data)?;
            if !from_data.state.out_edges.iter().any(|e| e.edge.gid() == gid) {
                return Err(Error::NotFound);
            }
            self.unlink_edge(&mut txn, from_v, &mut from_data, edge, Direction::Out);
            self.unlink_edge(&mut txn, to_v, &mut to_data, edge, Direction::In);
        }

        if txn.mode == StorageMode::InMemoryTransactional {
            if let EdgeRef::Handle(record) = &edge.edge {
                let mut edge_data = record.data.write();
                check_write_edge(&txn, edge_data.delta.as_ref().map(|d| d.stamp()))?;
                let delta = txn.make_delta(DeltaAction::RecreateObject);
                delta.set_next(edge_data.delta.clone());
                edge_data.delta = Some(Arc::clone(&delta));
                edge_data.state.deleted = true;
                txn.track(ObjectRef::Edge(Arc::clone(record)), delta);
            }
            txn.ops.push(WalOp::EdgeDelete {
                gid,
                from: from_v.gid,
                to: to_v.gid,
                edge_type: self
                    .inner
                    .mapper
                    .id_to_name(edge.edge_type.as_u64())
                    .unwrap_or_default(),
            });
        } else {
            if let EdgeRef::Handle(record) = &edge.edge {
                record.data.write().state.deleted = true;
                self.inner.edges.remove(gid);
            }
            self.inner.edge_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Writes an edge property and returns the old value.
    ///
    /// # Errors
    ///
    /// [`Error::PropertiesDisabled`] when the storage keeps no edge
    /// properties, otherwise as
    /// [`set_property`](Self::set_property).
    pub fn set_edge_property(
        &self,
        edge: &EdgeAccessor<'_>,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<PropertyValue> {
        let EdgeRef::Handle(record) = &edge.edge else {
            return Err(Error::PropertiesDisabled);
        };
        self.ensure_value_size(&value)?;
        let mut txn = self.txn.lock();
        let mut data = record.data.write();
        check_write_edge(&txn, data.delta.as_ref().map(|d| d.stamp()))?;
        if data.state.deleted {
            return Err(Error::NotFound);
        }

        let old = data
            .state
            .properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null);

        if txn.mode == StorageMode::InMemoryTransactional {
            let delta = txn.make_delta(DeltaAction::SetProperty {
                key: property,
                value: old.clone(),
            });
            delta.set_next(data.delta.clone());
            data.delta = Some(Arc::clone(&delta));
            txn.track(ObjectRef::Edge(Arc::clone(record)), delta);
            txn.ops.push(WalOp::EdgeSetProperty {
                gid: record.gid,
                property: self
                    .inner
                    .mapper
                    .id_to_name(property.as_u64())
                    .unwrap_or_default(),
                value: value.clone(),
            });
        }

        if value.is_null() {
            data.state.properties.remove(&property);
        } else {
            data.state.properties.insert(property, value);
        }
        Ok(old)
    }

    // === Lifecycle ===

    /// Commits the transaction.
    ///
    /// On [`Error::ConstraintViolation`] or a WAL [`Error::Io`] the
    /// transaction stays active so the caller can still abort it.
    ///
    /// # Errors
    ///
    /// [`Error::ConstraintViolation`], [`Error::Io`] (fatal WAL failure),
    /// [`Error::TransactionNotActive`].
    pub fn commit(&mut self) -> Result<()> {
        self.commit_internal(None)
    }

    /// Commits with an externally supplied commit timestamp. Used when
    /// applying a transaction that already committed elsewhere (a replica
    /// stream); the logical clock is advanced past the timestamp.
    ///
    /// # Errors
    ///
    /// As [`commit`](Self::commit).
    pub fn commit_with_timestamp(&mut self, desired_commit_ts: u64) -> Result<()> {
        self.commit_internal(Some(desired_commit_ts))
    }

    fn commit_internal(&mut self, desired_commit_ts: Option<u64>) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let mut txn = self.txn.lock();
        if !txn.active {
            return Err(Error::TransactionNotActive);
        }

        if txn.mode == StorageMode::InMemoryAnalytical {
            inner.next_timestamp();
            inner.live.deregister(txn.start_ts, txn.id);
            txn.active = false;
            return Ok(());
        }

        if txn.ops.is_empty() {
            inner.live.deregister(txn.start_ts, txn.id);
            txn.active = false;
            return Ok(());
        }

        validate_constraints(&inner, &txn)?;

        // Timestamp allocation, WAL append, and delta re-stamping happen
        // under the engine lock so no transaction can begin between a
        // commit's timestamp and its visibility.
        let commit_ts = {
            let _guard = inner.engine_lock.lock();
            let mut wal = inner.wal.lock();
            let ts = match desired_commit_ts {
                Some(desired) => {
                    inner.clock.fetch_max(desired, Ordering::AcqRel);
                    desired
                }
                None => inner.next_timestamp(),
            };
            if let Some(writer) = wal.as_mut() {
                writer.append_transaction(&txn.ops, ts)?;
            }
            // This store makes every write of the transaction visible to
            // transactions that start from now on.
            txn.stamp.store(ts, Ordering::Release);
            ts
        };

        for op in &txn.ops {
            match op {
                WalOp::VertexCreate { .. } => {
                    inner.vertex_count.fetch_add(1, Ordering::Relaxed);
                }
                WalOp::VertexDelete { .. } => {
                    inner.vertex_count.fetch_sub(1, Ordering::Relaxed);
                }
                WalOp::EdgeCreate { .. } => {
                    inner.edge_count.fetch_add(1, Ordering::Relaxed);
                }
                WalOp::EdgeDelete { .. } => {
                    inner.edge_count.fetch_sub(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }

        inner.live.deregister(txn.start_ts, txn.id);
        let deltas = std::mem::take(&mut txn.deltas);
        inner.committed.lock().push_back(CommittedTransaction {
            commit_ts,
            deltas,
        });
        txn.ops.clear();
        txn.active = false;
        Ok(())
    }

    /// Aborts the transaction, undoing every write.
    pub fn abort(&mut self) {
        let inner = Arc::clone(&self.inner);
        let mut txn = self.txn.lock();
        abort_transaction(&inner, &mut txn);
    }

    fn ensure_value_size(&self, value: &PropertyValue) -> Result<()> {
        match value {
            PropertyValue::Null
            | PropertyValue::Bool(_)
            | PropertyValue::Int(_)
            | PropertyValue::Double(_) => Ok(()),
            _ => {
                let mut buf = Vec::new();
                Encoder::buffer(&mut buf).write_value(value)?;
                if buf.len() as u64 > self.inner.config.max_property_value_bytes {
                    Err(Error::PropertyValueTooLarge)
                } else {
                    Ok(())
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn link_edge(
        &self,
        txn: &mut Transaction,
        vertex: &Arc<Vertex>,
        data: &mut VertexData,
        edge_type: EdgeTypeId,
        peer: Gid,
        edge_ref: &EdgeRef,
        direction: Direction,
    ) {
        let entry = AdjacencyEntry {
            edge_type,
            vertex: peer,
            edge: edge_ref.clone(),
        };
        if txn.mode == StorageMode::InMemoryTransactional {
            let action = match direction {
                Direction::Out => DeltaAction::RemoveOutEdge {
                    edge_type,
                    vertex: peer,
                    edge: edge_ref.clone(),
                },
                Direction::In => DeltaAction::RemoveInEdge {
                    edge_type,
                    vertex: peer,
                    edge: edge_ref.clone(),
                },
            };
            install_vertex_delta(txn, vertex, data, action);
        }
        match direction {
            Direction::Out => data.state.out_edges.push(entry),
            Direction::In => data.state.in_edges.push(entry),
        }
    }

    fn unlink_edge(
        &self,
        txn: &mut Transaction,
        vertex: &Arc<Vertex>,
        data: &mut VertexData,
        edge: &EdgeAccessor<'_>,
        direction: Direction,
    ) {
        let gid = edge.edge.gid();
        let peer = match direction {
            Direction::Out => edge.to.gid,
            Direction::In => edge.from.gid,
        };
        if txn.mode == StorageMode::InMemoryTransactional {
            let action = match direction {
                Direction::Out => DeltaAction::AddOutEdge {
                    edge_type: edge.edge_type,
                    vertex: peer,
                    edge: edge.edge.clone(),
                },
                Direction::In => DeltaAction::AddInEdge {
                    edge_type: edge.edge_type,
                    vertex: peer,
                    edge: edge.edge.clone(),
                },
            };
            install_vertex_delta(txn, vertex, data, action);
        }
        match direction {
            Direction::Out => data.state.remove_out_edge(gid),
            Direction::In => data.state.remove_in_edge(gid),
        };
    }
}

impl Drop for Accessor {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        let mut txn = self.txn.lock();
        if txn.active {
            abort_transaction(&inner, &mut txn);
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Out,
    In,
}

/// Conflict detection: the chain head must be ours, or committed at or
/// before our start timestamp.
fn check_write(txn: &Transaction, data: &VertexData) -> Result<()> {
    if txn.mode == StorageMode::InMemoryAnalytical {
        return Ok(());
    }
    if let Some(head) = &data.delta {
        let stamp = head.stamp();
        if stamp != txn.id && (is_transaction_id(stamp) || stamp > txn.start_ts) {
            return Err(Error::Serialization);
        }
    }
    Ok(())
}

fn check_write_edge(txn: &Transaction, head_stamp: Option<u64>) -> Result<()> {
    if txn.mode == StorageMode::InMemoryAnalytical {
        return Ok(());
    }
    if let Some(stamp) = head_stamp {
        if stamp != txn.id && (is_transaction_id(stamp) || stamp > txn.start_ts) {
            return Err(Error::Serialization);
        }
    }
    Ok(())
}

fn install_vertex_delta(
    txn: &mut Transaction,
    vertex: &Arc<Vertex>,
    data: &mut VertexData,
    action: DeltaAction,
) {
    let delta = txn.make_delta(action);
    delta.set_next(data.delta.clone());
    data.delta = Some(Arc::clone(&delta));
    txn.track(ObjectRef::Vertex(Arc::clone(vertex)), delta);
}

fn abort_transaction(inner: &StorageInner, txn: &mut Transaction) {
    if !txn.active {
        return;
    }
    for tracked in txn.deltas.drain(..).rev() {
        match &tracked.object {
            ObjectRef::Vertex(vertex) => {
                let mut data = vertex.data.write();
                apply_vertex_delta(&mut data.state, tracked.delta.action());
                data.delta = tracked.delta.next();
            }
            ObjectRef::Edge(edge) => {
                let mut data = edge.data.write();
                apply_edge_delta(&mut data.state, tracked.delta.action());
                data.delta = tracked.delta.next();
            }
        }
    }
    txn.ops.clear();
    inner.live.deregister(txn.start_ts, txn.id);
    txn.active = false;
}

/// Validates existence and unique constraints against the new view of
/// every vertex this transaction touched.
fn validate_constraints(inner: &StorageInner, txn: &Transaction) -> Result<()> {
    let params = ViewParams {
        start_ts: txn.start_ts,
        txn_id: txn.id,
        view: View::New,
        isolation: txn.isolation,
    };

    let mut seen = FxHashSet::default();
    let mut modified = Vec::new();
    for tracked in &txn.deltas {
        if let ObjectRef::Vertex(vertex) = &tracked.object {
            if seen.insert(vertex.gid) {
                modified.push(Arc::clone(vertex));
            }
        }
    }

    let unique_constraints = inner.constraints.unique_constraints();
    for vertex in &modified {
        let Some(state) = reconstruct_vertex(vertex, &params) else {
            continue;
        };

        if let Some((label, property)) = inner.constraints.existence_violation(&state) {
            return Err(Error::ConstraintViolation {
                kind: ConstraintKind::Existence,
                label: inner.name_of(label.as_u64()),
                properties: vec![inner.name_of(property.as_u64())],
            });
        }

        for (label, properties) in &unique_constraints {
            let Some(tuple) = ConstraintSet::unique_tuple(&state, *label, properties) else {
                continue;
            };
            let key = StorageInner::encode_tuple(&tuple);
            let conflict = match inner.indices.label_entries(*label) {
                Some(gids) => gids.into_iter().any(|gid| {
                    gid != vertex.gid
                        && unique_tuple_matches(inner, gid, *label, properties, &key, &params)
                }),
                None => inner.vertices.iter().any(|(gid, _)| {
                    gid != vertex.gid
                        && unique_tuple_matches(inner, gid, *label, properties, &key, &params)
                }),
            };
            if conflict {
                return Err(Error::ConstraintViolation {
                    kind: ConstraintKind::Unique,
                    label: inner.name_of(label.as_u64()),
                    properties: properties
                        .iter()
                        .map(|p| inner.name_of(p.as_u64()))
                        .collect(),
                });
            }
        }
    }
    Ok(())
}

fn unique_tuple_matches(
    inner: &StorageInner,
    gid: Gid,
    label: LabelId,
    properties: &[PropertyId],
    key: &[u8],
    params: &ViewParams,
) -> bool {
    let Some(vertex) = inner.vertices.get(gid) else {
        return false;
    };
    let Some(state) = reconstruct_vertex(&vertex, params) else {
        return false;
    };
    let Some(tuple) = ConstraintSet::unique_tuple(&state, label, properties) else {
        return false;
    };
    StorageInner::encode_tuple(&tuple) == key
}

// === Object accessors ===

/// A handle to one vertex inside a transaction.
pub struct VertexAccessor<'a> {
    pub(crate) vertex: Arc<Vertex>,
    pub(crate) acc: &'a Accessor,
}

impl VertexAccessor<'_> {
    /// The vertex GID.
    #[must_use]
    pub fn gid(&self) -> Gid {
        self.vertex.gid
    }

    /// Adds a label; see [`Accessor::add_label`].
    ///
    /// # Errors
    ///
    /// See [`Accessor::add_label`].
    pub fn add_label(&self, label: LabelId) -> Result<bool> {
        self.acc.add_label(self, label)
    }

    /// Removes a label; see [`Accessor::remove_label`].
    ///
    /// # Errors
    ///
    /// See [`Accessor::remove_label`].
    pub fn remove_label(&self, label: LabelId) -> Result<bool> {
        self.acc.remove_label(self, label)
    }

    /// Writes a property; see [`Accessor::set_property`].
    ///
    /// # Errors
    ///
    /// See [`Accessor::set_property`].
    pub fn set_property(&self, property: PropertyId, value: PropertyValue) -> Result<PropertyValue> {
        self.acc.set_property(self, property, value)
    }

    /// Clears a property; see [`Accessor::remove_property`].
    ///
    /// # Errors
    ///
    /// See [`Accessor::remove_property`].
    pub fn remove_property(&self, property: PropertyId) -> Result<PropertyValue> {
        self.acc.remove_property(self, property)
    }

    fn view_state(&self, view: View) -> Result<quiver_core::VertexState> {
        let txn = self.acc.txn.lock();
        let params = self.acc.params(&txn, view);
        drop(txn);
        reconstruct_vertex(&self.vertex, &params).ok_or(Error::NotFound)
    }

    /// Labels at the given view.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the vertex is invisible in this view.
    pub fn labels(&self, view: View) -> Result<Vec<LabelId>> {
        let mut labels: Vec<LabelId> = self.view_state(view)?.labels.into_iter().collect();
        labels.sort();
        Ok(labels)
    }

    /// All properties at the given view.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the vertex is invisible in this view.
    pub fn properties(&self, view: View) -> Result<BTreeMap<PropertyId, PropertyValue>> {
        Ok(self.view_state(view)?.properties)
    }

    /// One property at the given view (`Null` when absent).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the vertex is invisible in this view.
    pub fn property(&self, property: PropertyId, view: View) -> Result<PropertyValue> {
        Ok(self
            .view_state(view)?
            .properties
            .remove(&property)
            .unwrap_or(PropertyValue::Null))
    }

    /// Incoming edges at the given view.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the vertex is invisible in this view.
    pub fn in_edges(&self, view: View) -> Result<Vec<EdgeAccessor<'_>>> {
        let state = self.view_state(view)?;
        Ok(state
            .in_edges
            .into_iter()
            .filter_map(|entry| {
                let from = self.acc.inner.vertices.get(entry.vertex)?;
                Some(EdgeAccessor {
                    acc: self.acc,
                    edge: entry.edge,
                    edge_type: entry.edge_type,
                    from,
                    to: Arc::clone(&self.vertex),
                })
            })
            .collect())
    }

    /// Outgoing edges at the given view.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the vertex is invisible in this view.
    pub fn out_edges(&self, view: View) -> Result<Vec<EdgeAccessor<'_>>> {
        let state = self.view_state(view)?;
        Ok(state
            .out_edges
            .into_iter()
            .filter_map(|entry| {
                let to = self.acc.inner.vertices.get(entry.vertex)?;
                Some(EdgeAccessor {
                    acc: self.acc,
                    edge: entry.edge,
                    edge_type: entry.edge_type,
                    from: Arc::clone(&self.vertex),
                    to,
                })
            })
            .collect())
    }
}

/// A handle to one edge inside a transaction.
pub struct EdgeAccessor<'a> {
    pub(crate) acc: &'a Accessor,
    pub(crate) edge: EdgeRef,
    pub(crate) edge_type: EdgeTypeId,
    pub(crate) from: Arc<Vertex>,
    pub(crate) to: Arc<Vertex>,
}

impl EdgeAccessor<'_> {
    /// The edge GID.
    #[must_use]
    pub fn gid(&self) -> Gid {
        self.edge.gid()
    }

    /// The edge type.
    #[must_use]
    pub fn edge_type(&self) -> EdgeTypeId {
        self.edge_type
    }

    /// Source vertex GID.
    #[must_use]
    pub fn from_gid(&self) -> Gid {
        self.from.gid
    }

    /// Destination vertex GID.
    #[must_use]
    pub fn to_gid(&self) -> Gid {
        self.to.gid
    }

    /// Writes a property; see [`Accessor::set_edge_property`].
    ///
    /// # Errors
    ///
    /// See [`Accessor::set_edge_property`].
    pub fn set_property(&self, property: PropertyId, value: PropertyValue) -> Result<PropertyValue> {
        self.acc.set_edge_property(self, property, value)
    }

    /// All properties at the given view; empty when the storage keeps no
    /// edge properties.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the edge is invisible in this view.
    pub fn properties(&self, view: View) -> Result<BTreeMap<PropertyId, PropertyValue>> {
        match &self.edge {
            EdgeRef::Gid(_) => Ok(BTreeMap::new()),
            EdgeRef::Handle(record) => {
                let txn = self.acc.txn.lock();
                let params = self.acc.params(&txn, view);
                drop(txn);
                reconstruct_edge(record, &params)
                    .map(|state| state.properties)
                    .ok_or(Error::NotFound)
            }
        }
    }

    /// One property at the given view (`Null` when absent).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the edge is invisible in this view.
    pub fn property(&self, property: PropertyId, view: View) -> Result<PropertyValue> {
        Ok(self
            .properties(view)?
            .remove(&property)
            .unwrap_or(PropertyValue::Null))
    }
}

// === Lazy vertex streams ===

enum StreamSource {
    Scan { last: Option<Gid> },
    Fixed { gids: Vec<Gid>, pos: usize },
}

struct StreamFilter {
    label: LabelId,
    property: Option<(PropertyId, PropertyValue)>,
}

/// A lazy sequence of visible vertices.
///
/// Visibility and predicates are evaluated per step, so concurrent
/// insertions ahead of the cursor are observed and nothing is
/// materialized up front.
pub struct VertexStream<'a> {
    acc: &'a Accessor,
    view: View,
    source: StreamSource,
    filter: Option<StreamFilter>,
}

impl<'a> Iterator for VertexStream<'a> {
    type Item = VertexAccessor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let vertex = match &mut self.source {
                StreamSource::Scan { last } => {
                    let (gid, vertex) = self.acc.inner.vertices.first_after(*last)?;
                    *last = Some(gid);
                    vertex
                }
                StreamSource::Fixed { gids, pos } => {
                    let gid = *gids.get(*pos)?;
                    *pos += 1;
                    match self.acc.inner.vertices.get(gid) {
                        Some(vertex) => vertex,
                        None => continue,
                    }
                }
            };

            let txn = self.acc.txn.lock();
            let params = self.acc.params(&txn, self.view);
            drop(txn);
            let Some(state) = reconstruct_vertex(&vertex, &params) else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !state.has_label(filter.label) {
                    continue;
                }
                if let Some((property, value)) = &filter.property {
                    if state.properties.get(property) != Some(value) {
                        continue;
                    }
                }
            }
            return Some(VertexAccessor {
                vertex,
                acc: self.acc,
            });
        }
    }
}
