//! The storage engine front door.
//!
//! [`Storage`] owns the logical clock, both object stores, the interner,
//! index and constraint registries, the WAL, and the background jobs
//! (garbage collection and periodic snapshots). User work happens through
//! [`Accessor`]s handed out by [`Storage::access`].

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arcstr::ArcStr;
use parking_lot::Mutex;
use quiver_common::hash::FxHashMap;
use quiver_common::types::{
    IsolationLevel, LabelId, PropertyId, PropertyValue, StorageMode, View,
};
use quiver_common::{Error, Result, error::ConstraintKind};
use quiver_core::{
    ConstraintSet, Edge, GidMap, Indices, NameIdMapper, Vertex, ViewParams, reconstruct_vertex,
};

use crate::accessor::Accessor;
use crate::config::Config;
use crate::durability::{self, Encoder, SnapshotWriter, WalOp, WalWriter, snapshot};
use crate::gc;
use crate::transaction::{CommittedTransaction, LiveSet};

/// Shared engine state behind the public handles.
pub(crate) struct StorageInner {
    pub(crate) config: Config,
    pub(crate) uuid: ArcStr,
    pub(crate) epoch_id: ArcStr,
    pub(crate) epoch_history: Mutex<Vec<(ArcStr, u64)>>,
    /// Serializes timestamp issuance at begin against the commit sequence
    /// (timestamp, WAL append, delta re-stamp). A transaction that starts
    /// after a commit's timestamp must already see its stamped deltas.
    pub(crate) engine_lock: Mutex<()>,
    /// Last issued logical timestamp; start and commit timestamps share it.
    pub(crate) clock: AtomicU64,
    pub(crate) next_txn_id: AtomicU64,
    pub(crate) vertices: GidMap<Vertex>,
    pub(crate) edges: GidMap<Edge>,
    pub(crate) mapper: NameIdMapper,
    pub(crate) indices: Indices,
    pub(crate) constraints: ConstraintSet,
    pub(crate) live: LiveSet,
    pub(crate) committed: Mutex<VecDeque<CommittedTransaction>>,
    pub(crate) wal: Mutex<Option<WalWriter>>,
    pub(crate) vertex_count: AtomicU64,
    pub(crate) edge_count: AtomicU64,
}

impl StorageInner {
    /// Issues the next timestamp from the logical clock.
    pub(crate) fn next_timestamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recently issued timestamp.
    pub(crate) fn current_timestamp(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Allocates a transaction id in the disjoint stamp space.
    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A view of everything committed as of now; used by DDL scans and the
    /// snapshot writer's pinning transaction. Passing through the engine
    /// lock guarantees every commit at or before the observed timestamp
    /// has finished re-stamping.
    pub(crate) fn committed_params(&self, view: View) -> ViewParams {
        let start_ts = {
            let _guard = self.engine_lock.lock();
            self.current_timestamp()
        };
        ViewParams {
            start_ts,
            txn_id: self.next_transaction_id(),
            view,
            isolation: IsolationLevel::SnapshotIsolation,
        }
    }

    /// Appends a declaration operation as its own WAL transaction.
    pub(crate) fn write_ddl(&self, op: WalOp) -> Result<()> {
        let _guard = self.engine_lock.lock();
        let mut wal = self.wal.lock();
        if let Some(writer) = wal.as_mut() {
            let ts = self.next_timestamp();
            writer.append_transaction(std::slice::from_ref(&op), ts)?;
        }
        Ok(())
    }

    /// Encodes a unique-constraint value tuple into a comparable key.
    pub(crate) fn encode_tuple(values: &[PropertyValue]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut enc = Encoder::buffer(&mut buf);
        for value in values {
            // Infallible for in-memory buffers.
            let _ = enc.write_value(value);
        }
        buf
    }

    /// Resolves an id back to its interned name for error messages.
    pub(crate) fn name_of(&self, id: u64) -> String {
        self.mapper
            .id_to_name(id)
            .map_or_else(|| format!("#{id}"), |name| name.to_string())
    }
}

/// A periodic background job with graceful shutdown, used for the
/// collector and the snapshot creator.
struct PeriodicRunner {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicRunner {
    fn spawn(name: &str, interval: Duration, mut job: impl FnMut() + Send + 'static) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => job(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .expect("failed to spawn background thread");
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A durable MVCC property-graph store.
pub struct Storage {
    inner: Arc<StorageInner>,
    gc_runner: Option<PeriodicRunner>,
    snapshot_runner: Option<PeriodicRunner>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Opens (and if needed recovers) a storage at `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid settings, [`Error::Io`] if the
    /// directories cannot be created, and [`Error::Recovery`] when the
    /// on-disk state cannot be reconstructed.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(config.snapshots_dir())?;
        fs::create_dir_all(config.wal_dir())?;

        let recovered = crate::durability::recovery::recover(&config)?;

        let uuid = recovered
            .uuid
            .unwrap_or_else(|| ArcStr::from(uuid::Uuid::new_v4().to_string()));
        let epoch_id = ArcStr::from(uuid::Uuid::new_v4().to_string());

        let wal = match config.storage_mode {
            StorageMode::InMemoryTransactional => Some(WalWriter::new(
                config.wal_dir(),
                uuid.clone(),
                config.wal_file_size_bytes,
                config.wal_file_flush_every,
                recovered.next_wal_seq,
            )),
            StorageMode::InMemoryAnalytical => None,
        };

        let inner = Arc::new(StorageInner {
            uuid,
            epoch_id,
            epoch_history: Mutex::new(recovered.epoch_history),
            engine_lock: Mutex::new(()),
            clock: AtomicU64::new(recovered.last_commit_ts),
            next_txn_id: AtomicU64::new(quiver_core::TXN_ID_BIT | 1),
            vertices: recovered.vertices,
            edges: recovered.edges,
            mapper: recovered.mapper,
            indices: recovered.indices,
            constraints: recovered.constraints,
            live: LiveSet::new(),
            committed: Mutex::new(VecDeque::new()),
            wal: Mutex::new(wal),
            vertex_count: AtomicU64::new(recovered.vertex_count),
            edge_count: AtomicU64::new(recovered.edge_count),
            config,
        });

        let gc_runner = {
            let inner = Arc::clone(&inner);
            PeriodicRunner::spawn("quiver-gc", inner.config.gc_interval, move || {
                gc::collect(&inner);
            })
        };
        let snapshot_runner = {
            let inner = Arc::clone(&inner);
            PeriodicRunner::spawn(
                "quiver-snapshot",
                inner.config.snapshot_interval,
                move || {
                    if let Err(e) = create_snapshot_inner(&inner) {
                        tracing::warn!("periodic snapshot failed: {e}");
                    }
                },
            )
        };

        Ok(Self {
            inner,
            gc_runner: Some(gc_runner),
            snapshot_runner: Some(snapshot_runner),
        })
    }

    /// Begins a transaction at the configured default isolation level.
    #[must_use]
    pub fn access(&self) -> Accessor {
        self.access_with_isolation(self.inner.config.default_isolation_level)
    }

    /// Begins a transaction at an explicit isolation level.
    #[must_use]
    pub fn access_with_isolation(&self, isolation: IsolationLevel) -> Accessor {
        Accessor::begin(Arc::clone(&self.inner), isolation)
    }

    /// Writes a snapshot now and applies the retention policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on write failure; the partial file is removed
    /// and the engine keeps running.
    pub fn create_snapshot(&self) -> Result<()> {
        create_snapshot_inner(&self.inner)
    }

    /// Runs one garbage collection cycle immediately.
    pub fn run_gc(&self) -> crate::gc::GcStats {
        gc::collect(&self.inner)
    }

    /// Declares a label index and backfills it from committed data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the declaration fails.
    pub fn create_label_index(&self, label: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        if !inner.indices.create_label_index(label_id) {
            return Ok(false);
        }
        let params = inner.committed_params(View::New);
        for (gid, vertex) in inner.vertices.iter() {
            if let Some(state) = reconstruct_vertex(&vertex, &params) {
                if state.has_label(label_id) {
                    inner.indices.on_add_label(label_id, gid, &state.properties);
                }
            }
        }
        inner.write_ddl(WalOp::LabelIndexCreate {
            label: label.into(),
        })?;
        Ok(true)
    }

    /// Drops a label index by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the removal fails.
    pub fn drop_label_index(&self, label: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        if !inner.indices.drop_label_index(label_id) {
            return Ok(false);
        }
        inner.write_ddl(WalOp::LabelIndexDrop {
            label: label.into(),
        })?;
        Ok(true)
    }

    /// Declares a label+property index and backfills it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the declaration fails.
    pub fn create_label_property_index(&self, label: &str, property: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_id = PropertyId::new(inner.mapper.name_to_id(property));
        if !inner
            .indices
            .create_label_property_index(label_id, property_id)
        {
            return Ok(false);
        }
        let params = inner.committed_params(View::New);
        for (gid, vertex) in inner.vertices.iter() {
            if let Some(state) = reconstruct_vertex(&vertex, &params) {
                if state.has_label(label_id) && state.properties.contains_key(&property_id) {
                    inner.indices.on_set_property(property_id, gid, &state.labels);
                }
            }
        }
        inner.write_ddl(WalOp::LabelPropertyIndexCreate {
            label: label.into(),
            property: property.into(),
        })?;
        Ok(true)
    }

    /// Drops a label+property index by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the removal fails.
    pub fn drop_label_property_index(&self, label: &str, property: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_id = PropertyId::new(inner.mapper.name_to_id(property));
        if !inner
            .indices
            .drop_label_property_index(label_id, property_id)
        {
            return Ok(false);
        }
        inner.write_ddl(WalOp::LabelPropertyIndexDrop {
            label: label.into(),
            property: property.into(),
        })?;
        Ok(true)
    }

    /// Declares an existence constraint after validating committed data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstraintViolation`] when existing data violates
    /// the constraint, [`Error::Io`] if persisting fails.
    pub fn create_existence_constraint(&self, label: &str, property: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_id = PropertyId::new(inner.mapper.name_to_id(property));

        let params = inner.committed_params(View::New);
        for (_, vertex) in inner.vertices.iter() {
            if let Some(state) = reconstruct_vertex(&vertex, &params) {
                if state.has_label(label_id) && !state.properties.contains_key(&property_id) {
                    return Err(Error::ConstraintViolation {
                        kind: ConstraintKind::Existence,
                        label: label.to_string(),
                        properties: vec![property.to_string()],
                    });
                }
            }
        }

        if !inner.constraints.declare_existence(label_id, property_id) {
            return Ok(false);
        }
        inner.write_ddl(WalOp::ExistenceConstraintCreate {
            label: label.into(),
            property: property.into(),
        })?;
        Ok(true)
    }

    /// Drops an existence constraint by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the removal fails.
    pub fn drop_existence_constraint(&self, label: &str, property: &str) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_id = PropertyId::new(inner.mapper.name_to_id(property));
        if !inner.constraints.drop_existence(label_id, property_id) {
            return Ok(false);
        }
        inner.write_ddl(WalOp::ExistenceConstraintDrop {
            label: label.into(),
            property: property.into(),
        })?;
        Ok(true)
    }

    /// Declares a unique constraint after validating committed data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstraintViolation`] when existing data holds
    /// duplicates, [`Error::Io`] if persisting fails.
    pub fn create_unique_constraint(&self, label: &str, properties: &[&str]) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_ids: Vec<PropertyId> = properties
            .iter()
            .map(|p| PropertyId::new(inner.mapper.name_to_id(p)))
            .collect();

        let params = inner.committed_params(View::New);
        let mut seen: FxHashMap<Vec<u8>, ()> = FxHashMap::default();
        for (_, vertex) in inner.vertices.iter() {
            let Some(state) = reconstruct_vertex(&vertex, &params) else {
                continue;
            };
            let Some(tuple) = ConstraintSet::unique_tuple(&state, label_id, &property_ids) else {
                continue;
            };
            let key = StorageInner::encode_tuple(&tuple);
            if seen.insert(key, ()).is_some() {
                return Err(Error::ConstraintViolation {
                    kind: ConstraintKind::Unique,
                    label: label.to_string(),
                    properties: properties.iter().map(ToString::to_string).collect(),
                });
            }
        }

        if !inner
            .constraints
            .declare_unique(label_id, property_ids)
        {
            return Ok(false);
        }
        inner.write_ddl(WalOp::UniqueConstraintCreate {
            label: label.into(),
            properties: properties.iter().map(|p| ArcStr::from(*p)).collect(),
        })?;
        Ok(true)
    }

    /// Drops a unique constraint by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if persisting the removal fails.
    pub fn drop_unique_constraint(&self, label: &str, properties: &[&str]) -> Result<bool> {
        let inner = &self.inner;
        let label_id = LabelId::new(inner.mapper.name_to_id(label));
        let property_ids: Vec<PropertyId> = properties
            .iter()
            .map(|p| PropertyId::new(inner.mapper.name_to_id(p)))
            .collect();
        if !inner.constraints.drop_unique(label_id, property_ids) {
            return Ok(false);
        }
        inner.write_ddl(WalOp::UniqueConstraintDrop {
            label: label.into(),
            properties: properties.iter().map(|p| ArcStr::from(*p)).collect(),
        })?;
        Ok(true)
    }

    /// Number of committed vertices.
    #[must_use]
    pub fn vertex_count(&self) -> u64 {
        self.inner.vertex_count.load(Ordering::Relaxed)
    }

    /// Number of committed edges.
    #[must_use]
    pub fn edge_count(&self) -> u64 {
        self.inner.edge_count.load(Ordering::Relaxed)
    }

    /// The storage UUID carried by every snapshot and WAL file.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// Shuts the engine down: stops the background jobs and finalizes the
    /// open WAL file. Dropping the storage does the same.
    pub fn close(self) {}
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Some(mut runner) = self.snapshot_runner.take() {
            runner.shutdown();
        }
        if let Some(mut runner) = self.gc_runner.take() {
            runner.shutdown();
        }
        // Finalize the open WAL file so to_ts is durable.
        if let Some(writer) = self.inner.wal.lock().as_mut() {
            if let Err(e) = writer.finalize_current() {
                tracing::warn!("failed to finalize WAL on close: {e}");
            }
        }
    }
}

/// Writes one snapshot and applies retention. Shared by the public API and
/// the background runner.
fn create_snapshot_inner(inner: &Arc<StorageInner>) -> Result<()> {
    // Pin a start timestamp as a live read transaction so the collector
    // cannot prune versions the walk still needs. The engine lock ensures
    // every commit below the pinned timestamp has finished re-stamping.
    let (start_ts, txn_id) = {
        let _guard = inner.engine_lock.lock();
        let start_ts = inner.next_timestamp();
        let txn_id = inner.next_transaction_id();
        inner.live.register(start_ts, txn_id);
        (start_ts, txn_id)
    };

    let params = ViewParams {
        start_ts,
        txn_id,
        view: View::Old,
        isolation: IsolationLevel::SnapshotIsolation,
    };
    let history = inner.epoch_history.lock().clone();
    let path = inner
        .config
        .snapshots_dir()
        .join(snapshot::snapshot_file_name(start_ts));

    let result = SnapshotWriter {
        vertices: &inner.vertices,
        edges: &inner.edges,
        mapper: &inner.mapper,
        indices: &inner.indices,
        constraints: &inner.constraints,
        params,
        uuid: &inner.uuid,
        epoch_id: &inner.epoch_id,
        epoch_history: &history,
        start_timestamp: start_ts,
        properties_on_edges: inner.config.properties_on_edges,
    }
    .write(&path);

    inner.live.deregister(start_ts, txn_id);

    if let Err(e) = result {
        tracing::warn!(path = %path.display(), "snapshot write failed: {e}");
        let _ = fs::remove_file(&path);
        return Err(e);
    }

    // Checkpoint: finalize the open WAL file so retention can reason about
    // complete ranges only.
    if let Some(writer) = inner.wal.lock().as_mut() {
        writer.finalize_current()?;
    }

    apply_retention(inner);
    Ok(())
}

/// Deletes snapshots beyond the retention count and WAL files that no kept
/// snapshot needs, always keeping one file covering the boundary.
fn apply_retention(inner: &Arc<StorageInner>) {
    let retention = inner.config.snapshot_retention_count as usize;

    let mut snapshots: Vec<_> = match fs::read_dir(inner.config.snapshots_dir()) {
        Ok(dir) => dir
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "snapshot"))
            .collect(),
        Err(e) => {
            tracing::warn!("retention scan failed: {e}");
            return;
        }
    };
    snapshots.sort();

    let oldest_kept_start = if snapshots.len() > retention {
        let split = snapshots.len() - retention;
        for old in &snapshots[..split] {
            tracing::debug!(path = %old.display(), "retention deleting snapshot");
            if let Err(e) = fs::remove_file(old) {
                tracing::warn!(path = %old.display(), "failed to delete snapshot: {e}");
            }
        }
        parse_ts_from_name(&snapshots[split])
    } else {
        snapshots.first().and_then(|p| parse_ts_from_name(p))
    };

    let Some(boundary) = oldest_kept_start else {
        return;
    };

    // WAL files finalized entirely before the boundary are obsolete, except
    // the newest of them: the file straddling the boundary must survive.
    let Ok(dir) = fs::read_dir(inner.config.wal_dir()) else {
        return;
    };
    let mut obsolete: Vec<(u64, std::path::PathBuf)> = Vec::new();
    for entry in dir.filter_map(std::result::Result::ok) {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "wal") {
            continue;
        }
        let Ok(data) = fs::read(&path) else { continue };
        let Ok(header) = durability::wal::read_header(&data) else {
            continue;
        };
        if header.to_ts != 0 && header.to_ts < boundary {
            obsolete.push((header.seq_num, path));
        }
    }
    obsolete.sort();
    if !obsolete.is_empty() {
        // Keep the newest obsolete file to cover the boundary.
        for (_, path) in &obsolete[..obsolete.len() - 1] {
            tracing::debug!(path = %path.display(), "retention deleting wal file");
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), "failed to delete wal file: {e}");
            }
        }
    }
}

fn parse_ts_from_name(path: &std::path::Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}
