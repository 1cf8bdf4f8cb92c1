//! Durability: binary codec, write-ahead log, snapshots, and recovery.
//!
//! On-disk layout under the data directory:
//!
//! ```text
//! <data_dir>/
//!   snapshots/<start_ts>.snapshot
//!   wal/<from_ts>_<seq>.wal
//! ```
//!
//! Both file kinds begin with a magic string and a format version. Corrupt
//! files are skipped at recovery with a warning; they never crash startup.

pub mod encoder;
pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use encoder::{Decoder, Encoder, FileEncoder};
pub use snapshot::{SnapshotInfo, SnapshotWriter};
pub use wal::{WalEntry, WalHeader, WalOp, WalWriter};

/// Magic prefix of snapshot files.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"QVsn";

/// Magic prefix of WAL files.
pub const WAL_MAGIC: &[u8; 4] = b"QVwl";

/// Bumped whenever either on-disk encoding changes.
pub const FORMAT_VERSION: u64 = 1;

/// Single-byte markers tagging snapshot sections and encoded values.
pub mod marker {
    /// Start of the section offset table.
    pub const SECTION_OFFSETS: u8 = 0x80;
    /// One encoded edge record.
    pub const SECTION_EDGE: u8 = 0x81;
    /// One encoded vertex record.
    pub const SECTION_VERTEX: u8 = 0x82;
    /// Start of the index declarations.
    pub const SECTION_INDICES: u8 = 0x83;
    /// Start of the constraint declarations.
    pub const SECTION_CONSTRAINTS: u8 = 0x84;
    /// Start of the id to name table.
    pub const SECTION_MAPPER: u8 = 0x85;
    /// Start of the epoch history.
    pub const SECTION_EPOCH_HISTORY: u8 = 0x86;
    /// Start of the trailing metadata.
    pub const SECTION_METADATA: u8 = 0x87;

    /// Property value kind tags.
    pub const TYPE_NULL: u8 = 0x10;
    /// Boolean value.
    pub const TYPE_BOOL: u8 = 0x11;
    /// 64-bit signed integer.
    pub const TYPE_INT: u8 = 0x12;
    /// 64-bit float.
    pub const TYPE_DOUBLE: u8 = 0x13;
    /// Length-prefixed UTF-8.
    pub const TYPE_STRING: u8 = 0x14;
    /// Length-prefixed list of values.
    pub const TYPE_LIST: u8 = 0x15;
    /// Length-prefixed string-keyed map of values.
    pub const TYPE_MAP: u8 = 0x16;

    /// WAL record tags.
    pub const WAL_VERTEX_CREATE: u8 = 0x50;
    /// Vertex deletion.
    pub const WAL_VERTEX_DELETE: u8 = 0x51;
    /// Label added to a vertex.
    pub const WAL_VERTEX_ADD_LABEL: u8 = 0x52;
    /// Label removed from a vertex.
    pub const WAL_VERTEX_REMOVE_LABEL: u8 = 0x53;
    /// Vertex property write (null value clears).
    pub const WAL_VERTEX_SET_PROPERTY: u8 = 0x54;
    /// Edge creation.
    pub const WAL_EDGE_CREATE: u8 = 0x55;
    /// Edge deletion.
    pub const WAL_EDGE_DELETE: u8 = 0x56;
    /// Edge property write.
    pub const WAL_EDGE_SET_PROPERTY: u8 = 0x57;
    /// Transaction end marker carrying the commit timestamp.
    pub const WAL_TRANSACTION_END: u8 = 0x58;
    /// Label index declaration.
    pub const WAL_LABEL_INDEX_CREATE: u8 = 0x60;
    /// Label index removal.
    pub const WAL_LABEL_INDEX_DROP: u8 = 0x61;
    /// Label+property index declaration.
    pub const WAL_LABEL_PROPERTY_INDEX_CREATE: u8 = 0x62;
    /// Label+property index removal.
    pub const WAL_LABEL_PROPERTY_INDEX_DROP: u8 = 0x63;
    /// Existence constraint declaration.
    pub const WAL_EXISTENCE_CONSTRAINT_CREATE: u8 = 0x64;
    /// Existence constraint removal.
    pub const WAL_EXISTENCE_CONSTRAINT_DROP: u8 = 0x65;
    /// Unique constraint declaration.
    pub const WAL_UNIQUE_CONSTRAINT_CREATE: u8 = 0x66;
    /// Unique constraint removal.
    pub const WAL_UNIQUE_CONSTRAINT_DROP: u8 = 0x67;
}
