//! Storage configuration.

use std::path::PathBuf;
use std::time::Duration;

use quiver_common::types::{IsolationLevel, StorageMode};
use quiver_common::{Error, Result};

/// Storage engine configuration.
///
/// The defaults give a durable transactional store with snapshots every
/// five minutes. Builder methods tweak individual knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (`snapshots/` and `wal/` live under it).
    pub data_dir: PathBuf,

    /// Whether edges carry a property map. When disabled, edges exist only
    /// as adjacency entries and property access on them fails fast.
    pub properties_on_edges: bool,

    /// How often the background snapshot runs.
    pub snapshot_interval: Duration,

    /// How many finished snapshots to keep. Must be at least 1.
    pub snapshot_retention_count: u32,

    /// Size threshold after which the open WAL file is finalized.
    pub wal_file_size_bytes: u64,

    /// fsync the WAL after this many records.
    pub wal_file_flush_every: u64,

    /// How often the garbage collector runs.
    pub gc_interval: Duration,

    /// Isolation level for accessors that don't pick their own.
    pub default_isolation_level: IsolationLevel,

    /// Transactional MVCC or in-place analytical writes.
    pub storage_mode: StorageMode,

    /// Upper bound on an encoded property value, in bytes.
    pub max_property_value_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("quiver_data"),
            properties_on_edges: true,
            snapshot_interval: Duration::from_secs(300),
            snapshot_retention_count: 3,
            wal_file_size_bytes: 32 * 1024 * 1024,
            wal_file_flush_every: 1,
            gc_interval: Duration::from_secs(30),
            default_isolation_level: IsolationLevel::SnapshotIsolation,
            storage_mode: StorageMode::InMemoryTransactional,
            max_property_value_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Creates a configuration rooted at the given data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Disables edge properties.
    #[must_use]
    pub fn without_properties_on_edges(mut self) -> Self {
        self.properties_on_edges = false;
        self
    }

    /// Sets the background snapshot interval.
    #[must_use]
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Sets how many snapshots are retained.
    #[must_use]
    pub fn with_snapshot_retention(mut self, count: u32) -> Self {
        self.snapshot_retention_count = count;
        self
    }

    /// Sets the WAL file size threshold.
    #[must_use]
    pub fn with_wal_file_size(mut self, bytes: u64) -> Self {
        self.wal_file_size_bytes = bytes;
        self
    }

    /// Sets the WAL fsync batching interval, in records.
    #[must_use]
    pub fn with_wal_flush_every(mut self, records: u64) -> Self {
        self.wal_file_flush_every = records;
        self
    }

    /// Sets the garbage collection interval.
    #[must_use]
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the default isolation level.
    #[must_use]
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.default_isolation_level = level;
        self
    }

    /// Sets the storage mode.
    #[must_use]
    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Sets the encoded-size cap for a single property value.
    #[must_use]
    pub fn with_max_property_value_bytes(mut self, bytes: u64) -> Self {
        self.max_property_value_bytes = bytes;
        self
    }

    /// Validates invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_retention_count < 1 {
            return Err(Error::Config(
                "snapshot_retention_count must be at least 1".into(),
            ));
        }
        if self.wal_file_flush_every < 1 {
            return Err(Error::Config(
                "wal_file_flush_every must be at least 1".into(),
            ));
        }
        if self.wal_file_size_bytes < 4096 {
            return Err(Error::Config(
                "wal_file_size_bytes must be at least 4096".into(),
            ));
        }
        Ok(())
    }

    /// The snapshot directory under the data directory.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// The WAL directory under the data directory.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }
}
