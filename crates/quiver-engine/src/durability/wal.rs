//! The write-ahead log.
//!
//! Commits append their operations in forward form - the user-level
//! operation, not the MVCC inverse - followed by a transaction-end marker
//! carrying the commit timestamp. Replay reapplies whole transactions in
//! commit order, so a file truncated mid-transaction simply loses that
//! transaction and nothing else.
//!
//! Operations carry interned *names* rather than ids: the id space is
//! rebuilt from scratch at recovery, so ids are only meaningful inside one
//! process lifetime.
//!
//! Each file starts with `{magic, version, uuid, seq_num, from_ts, to_ts}`.
//! `to_ts` is zero while the file is open and back-patched at finalization,
//! which happens when the file crosses the size threshold or at an explicit
//! checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use quiver_common::types::{Gid, PropertyValue};
use quiver_common::{Error, Result};

use super::encoder::{Decoder, Encoder, FileEncoder};
use super::{FORMAT_VERSION, WAL_MAGIC, marker};

/// A forward operation as it appears in the log.
#[derive(Debug, Clone, PartialEq)]
pub enum WalOp {
    /// A vertex came into existence.
    VertexCreate {
        /// The vertex GID.
        gid: Gid,
    },
    /// A vertex was deleted.
    VertexDelete {
        /// The vertex GID.
        gid: Gid,
    },
    /// A label was added to a vertex.
    VertexAddLabel {
        /// The vertex GID.
        gid: Gid,
        /// The label name.
        label: ArcStr,
    },
    /// A label was removed from a vertex.
    VertexRemoveLabel {
        /// The vertex GID.
        gid: Gid,
        /// The label name.
        label: ArcStr,
    },
    /// A vertex property was written (`Null` clears it).
    VertexSetProperty {
        /// The vertex GID.
        gid: Gid,
        /// The property name.
        property: ArcStr,
        /// The new value.
        value: PropertyValue,
    },
    /// An edge came into existence.
    EdgeCreate {
        /// The edge GID.
        gid: Gid,
        /// Source vertex.
        from: Gid,
        /// Destination vertex.
        to: Gid,
        /// The edge type name.
        edge_type: ArcStr,
    },
    /// An edge was deleted.
    EdgeDelete {
        /// The edge GID.
        gid: Gid,
        /// Source vertex.
        from: Gid,
        /// Destination vertex.
        to: Gid,
        /// The edge type name.
        edge_type: ArcStr,
    },
    /// An edge property was written (`Null` clears it).
    EdgeSetProperty {
        /// The edge GID.
        gid: Gid,
        /// The property name.
        property: ArcStr,
        /// The new value.
        value: PropertyValue,
    },
    /// A label index was declared.
    LabelIndexCreate {
        /// The label name.
        label: ArcStr,
    },
    /// A label index was dropped.
    LabelIndexDrop {
        /// The label name.
        label: ArcStr,
    },
    /// A label+property index was declared.
    LabelPropertyIndexCreate {
        /// The label name.
        label: ArcStr,
        /// The property name.
        property: ArcStr,
    },
    /// A label+property index was dropped.
    LabelPropertyIndexDrop {
        /// The label name.
        label: ArcStr,
        /// The property name.
        property: ArcStr,
    },
    /// An existence constraint was declared.
    ExistenceConstraintCreate {
        /// The label name.
        label: ArcStr,
        /// The property name.
        property: ArcStr,
    },
    /// An existence constraint was dropped.
    ExistenceConstraintDrop {
        /// The label name.
        label: ArcStr,
        /// The property name.
        property: ArcStr,
    },
    /// A unique constraint was declared.
    UniqueConstraintCreate {
        /// The label name.
        label: ArcStr,
        /// The property names.
        properties: Vec<ArcStr>,
    },
    /// A unique constraint was dropped.
    UniqueConstraintDrop {
        /// The label name.
        label: ArcStr,
        /// The property names.
        properties: Vec<ArcStr>,
    },
}

/// One decoded log record: an operation or a transaction boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    /// A forward operation stamped with its transaction's commit timestamp.
    Op(WalOp),
    /// End of a transaction.
    TransactionEnd,
}

impl WalOp {
    fn marker(&self) -> u8 {
        match self {
            WalOp::VertexCreate { .. } => marker::WAL_VERTEX_CREATE,
            WalOp::VertexDelete { .. } => marker::WAL_VERTEX_DELETE,
            WalOp::VertexAddLabel { .. } => marker::WAL_VERTEX_ADD_LABEL,
            WalOp::VertexRemoveLabel { .. } => marker::WAL_VERTEX_REMOVE_LABEL,
            WalOp::VertexSetProperty { .. } => marker::WAL_VERTEX_SET_PROPERTY,
            WalOp::EdgeCreate { .. } => marker::WAL_EDGE_CREATE,
            WalOp::EdgeDelete { .. } => marker::WAL_EDGE_DELETE,
            WalOp::EdgeSetProperty { .. } => marker::WAL_EDGE_SET_PROPERTY,
            WalOp::LabelIndexCreate { .. } => marker::WAL_LABEL_INDEX_CREATE,
            WalOp::LabelIndexDrop { .. } => marker::WAL_LABEL_INDEX_DROP,
            WalOp::LabelPropertyIndexCreate { .. } => marker::WAL_LABEL_PROPERTY_INDEX_CREATE,
            WalOp::LabelPropertyIndexDrop { .. } => marker::WAL_LABEL_PROPERTY_INDEX_DROP,
            WalOp::ExistenceConstraintCreate { .. } => marker::WAL_EXISTENCE_CONSTRAINT_CREATE,
            WalOp::ExistenceConstraintDrop { .. } => marker::WAL_EXISTENCE_CONSTRAINT_DROP,
            WalOp::UniqueConstraintCreate { .. } => marker::WAL_UNIQUE_CONSTRAINT_CREATE,
            WalOp::UniqueConstraintDrop { .. } => marker::WAL_UNIQUE_CONSTRAINT_DROP,
        }
    }

    fn encode_payload(&self, ts: u64, buf: &mut Vec<u8>) -> Result<()> {
        let mut enc = Encoder::buffer(buf);
        enc.write_u64(ts)?;
        match self {
            WalOp::VertexCreate { gid } | WalOp::VertexDelete { gid } => {
                enc.write_u64(gid.as_u64())?;
            }
            WalOp::VertexAddLabel { gid, label } | WalOp::VertexRemoveLabel { gid, label } => {
                enc.write_u64(gid.as_u64())?;
                enc.write_string(label)?;
            }
            WalOp::VertexSetProperty {
                gid,
                property,
                value,
            }
            | WalOp::EdgeSetProperty {
                gid,
                property,
                value,
            } => {
                enc.write_u64(gid.as_u64())?;
                enc.write_string(property)?;
                enc.write_value(value)?;
            }
            WalOp::EdgeCreate {
                gid,
                from,
                to,
                edge_type,
            }
            | WalOp::EdgeDelete {
                gid,
                from,
                to,
                edge_type,
            } => {
                enc.write_u64(gid.as_u64())?;
                enc.write_u64(from.as_u64())?;
                enc.write_u64(to.as_u64())?;
                enc.write_string(edge_type)?;
            }
            WalOp::LabelIndexCreate { label } | WalOp::LabelIndexDrop { label } => {
                enc.write_string(label)?;
            }
            WalOp::LabelPropertyIndexCreate { label, property }
            | WalOp::LabelPropertyIndexDrop { label, property }
            | WalOp::ExistenceConstraintCreate { label, property }
            | WalOp::ExistenceConstraintDrop { label, property } => {
                enc.write_string(label)?;
                enc.write_string(property)?;
            }
            WalOp::UniqueConstraintCreate { label, properties }
            | WalOp::UniqueConstraintDrop { label, properties } => {
                enc.write_string(label)?;
                enc.write_len(properties.len() as u32)?;
                for property in properties {
                    enc.write_string(property)?;
                }
            }
        }
        Ok(())
    }

    fn decode_payload(tag: u8, dec: &mut Decoder<'_>) -> Result<WalOp> {
        let op = match tag {
            marker::WAL_VERTEX_CREATE => WalOp::VertexCreate {
                gid: Gid::new(dec.read_u64()?),
            },
            marker::WAL_VERTEX_DELETE => WalOp::VertexDelete {
                gid: Gid::new(dec.read_u64()?),
            },
            marker::WAL_VERTEX_ADD_LABEL => WalOp::VertexAddLabel {
                gid: Gid::new(dec.read_u64()?),
                label: dec.read_string()?,
            },
            marker::WAL_VERTEX_REMOVE_LABEL => WalOp::VertexRemoveLabel {
                gid: Gid::new(dec.read_u64()?),
                label: dec.read_string()?,
            },
            marker::WAL_VERTEX_SET_PROPERTY => WalOp::VertexSetProperty {
                gid: Gid::new(dec.read_u64()?),
                property: dec.read_string()?,
                value: dec.read_value()?,
            },
            marker::WAL_EDGE_CREATE => WalOp::EdgeCreate {
                gid: Gid::new(dec.read_u64()?),
                from: Gid::new(dec.read_u64()?),
                to: Gid::new(dec.read_u64()?),
                edge_type: dec.read_string()?,
            },
            marker::WAL_EDGE_DELETE => WalOp::EdgeDelete {
                gid: Gid::new(dec.read_u64()?),
                from: Gid::new(dec.read_u64()?),
                to: Gid::new(dec.read_u64()?),
                edge_type: dec.read_string()?,
            },
            marker::WAL_EDGE_SET_PROPERTY => WalOp::EdgeSetProperty {
                gid: Gid::new(dec.read_u64()?),
                property: dec.read_string()?,
                value: dec.read_value()?,
            },
            marker::WAL_LABEL_INDEX_CREATE => WalOp::LabelIndexCreate {
                label: dec.read_string()?,
            },
            marker::WAL_LABEL_INDEX_DROP => WalOp::LabelIndexDrop {
                label: dec.read_string()?,
            },
            marker::WAL_LABEL_PROPERTY_INDEX_CREATE => WalOp::LabelPropertyIndexCreate {
                label: dec.read_string()?,
                property: dec.read_string()?,
            },
            marker::WAL_LABEL_PROPERTY_INDEX_DROP => WalOp::LabelPropertyIndexDrop {
                label: dec.read_string()?,
                property: dec.read_string()?,
            },
            marker::WAL_EXISTENCE_CONSTRAINT_CREATE => WalOp::ExistenceConstraintCreate {
                label: dec.read_string()?,
                property: dec.read_string()?,
            },
            marker::WAL_EXISTENCE_CONSTRAINT_DROP => WalOp::ExistenceConstraintDrop {
                label: dec.read_string()?,
                property: dec.read_string()?,
            },
            marker::WAL_UNIQUE_CONSTRAINT_CREATE => {
                let label = dec.read_string()?;
                let count = dec.read_len()?;
                let mut properties = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    properties.push(dec.read_string()?);
                }
                WalOp::UniqueConstraintCreate { label, properties }
            }
            marker::WAL_UNIQUE_CONSTRAINT_DROP => {
                let label = dec.read_string()?;
                let count = dec.read_len()?;
                let mut properties = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    properties.push(dec.read_string()?);
                }
                WalOp::UniqueConstraintDrop { label, properties }
            }
            other => {
                return Err(Error::Recovery(format!(
                    "unknown WAL record marker {other:#04x}"
                )));
            }
        };
        Ok(op)
    }
}

/// Parsed header of one WAL file.
#[derive(Debug, Clone)]
pub struct WalHeader {
    /// Storage UUID the file belongs to.
    pub uuid: ArcStr,
    /// Monotonic file sequence number.
    pub seq_num: u64,
    /// Commit timestamp of the first transaction in the file.
    pub from_ts: u64,
    /// Commit timestamp of the last transaction; zero while the file is
    /// still open (not yet finalized).
    pub to_ts: u64,
}

struct OpenWal {
    encoder: FileEncoder,
    to_ts_offset: u64,
    to_ts: u64,
}

/// Appends committed transactions to the log, rotating files at the size
/// threshold.
pub struct WalWriter {
    dir: PathBuf,
    uuid: ArcStr,
    size_threshold: u64,
    flush_every: u64,
    next_seq: u64,
    records_since_sync: u64,
    current: Option<OpenWal>,
}

impl WalWriter {
    /// Creates a writer over `dir`. `next_seq` continues the sequence
    /// numbering found at recovery.
    #[must_use]
    pub fn new(
        dir: PathBuf,
        uuid: ArcStr,
        size_threshold: u64,
        flush_every: u64,
        next_seq: u64,
    ) -> Self {
        Self {
            dir,
            uuid,
            size_threshold,
            flush_every,
            next_seq,
            records_since_sync: 0,
            current: None,
        }
    }

    fn open_file(&mut self, from_ts: u64) -> Result<&mut OpenWal> {
        if self.current.is_none() {
            let seq = self.next_seq;
            self.next_seq += 1;
            let path = self.dir.join(wal_file_name(from_ts, seq));
            let mut encoder = FileEncoder::create(&path)?;
            encoder.write_bytes(WAL_MAGIC)?;
            encoder.write_u64(FORMAT_VERSION)?;
            encoder.write_string(&self.uuid)?;
            encoder.write_u64(seq)?;
            encoder.write_u64(from_ts)?;
            let to_ts_offset = encoder.position();
            encoder.write_u64(0)?; // to_ts, back-patched at finalization
            tracing::debug!(path = %path.display(), seq, from_ts, "opened wal file");
            self.current = Some(OpenWal {
                encoder,
                to_ts_offset,
                to_ts: 0,
            });
        }
        Ok(self.current.as_mut().expect("just opened"))
    }

    fn write_record(wal: &mut OpenWal, op_marker: u8, payload: &[u8]) -> Result<()> {
        wal.encoder.write_u8(op_marker)?;
        wal.encoder.write_len(payload.len() as u32)?;
        wal.encoder.write_bytes(payload)
    }

    /// Appends one committed transaction: every operation in order plus the
    /// transaction-end marker, all stamped with `commit_ts`.
    ///
    /// # Errors
    ///
    /// I/O errors here are fatal for the commit; the caller propagates them.
    pub fn append_transaction(&mut self, ops: &[WalOp], commit_ts: u64) -> Result<()> {
        let flush_every = self.flush_every;
        let wal = self.open_file(commit_ts)?;

        let mut payload = Vec::new();
        for op in ops {
            payload.clear();
            op.encode_payload(commit_ts, &mut payload)?;
            Self::write_record(wal, op.marker(), &payload)?;
        }
        payload.clear();
        Encoder::buffer(&mut payload).write_u64(commit_ts)?;
        Self::write_record(wal, marker::WAL_TRANSACTION_END, &payload)?;
        wal.to_ts = commit_ts;

        self.records_since_sync += ops.len() as u64 + 1;
        if self.records_since_sync >= flush_every {
            self.current.as_mut().expect("open").encoder.sync()?;
            self.records_since_sync = 0;
        } else {
            self.current.as_mut().expect("open").encoder.flush()?;
        }

        if self.current.as_ref().expect("open").encoder.position() >= self.size_threshold {
            self.finalize_current()?;
        }
        Ok(())
    }

    /// Finalizes the open file: back-patches `to_ts`, fsyncs, and closes.
    /// The next append starts a fresh file.
    pub fn finalize_current(&mut self) -> Result<()> {
        if let Some(mut wal) = self.current.take() {
            let to_ts = wal.to_ts;
            wal.encoder.set_position(wal.to_ts_offset)?;
            wal.encoder.write_u64(to_ts)?;
            wal.encoder.sync()?;
            self.records_since_sync = 0;
            tracing::debug!(to_ts, "finalized wal file");
        }
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize_current() {
            tracing::warn!("failed to finalize wal file on shutdown: {e}");
        }
    }
}

/// Builds the file name for a WAL file; names sort by start timestamp.
#[must_use]
pub fn wal_file_name(from_ts: u64, seq: u64) -> String {
    format!("{from_ts:020}_{seq:06}.wal")
}

/// Reads the header of a WAL file.
///
/// # Errors
///
/// Returns [`Error::Recovery`] for bad magic, unsupported version, or a
/// truncated header.
pub fn read_header(data: &[u8]) -> Result<WalHeader> {
    let mut dec = Decoder::new(data);
    if data.len() < WAL_MAGIC.len() || &data[..WAL_MAGIC.len()] != WAL_MAGIC {
        return Err(Error::Recovery("bad WAL magic".into()));
    }
    dec.set_position(WAL_MAGIC.len() as u64)?;
    let version = dec.read_u64()?;
    if version != FORMAT_VERSION {
        return Err(Error::Recovery(format!(
            "unsupported WAL version {version}"
        )));
    }
    let uuid = dec.read_string()?;
    let seq_num = dec.read_u64()?;
    let from_ts = dec.read_u64()?;
    let to_ts = dec.read_u64()?;
    Ok(WalHeader {
        uuid,
        seq_num,
        from_ts,
        to_ts,
    })
}

/// Reads a whole WAL file: its header plus every complete record.
///
/// A truncated or garbled tail ends the stream cleanly - records after the
/// damage are dropped, and replay later discards the trailing transaction
/// that lost its end marker.
///
/// # Errors
///
/// Only header-level damage is an error; body damage truncates.
pub fn read_file(path: &Path) -> Result<(WalHeader, Vec<(u64, WalEntry)>)> {
    let data = fs::read(path)?;
    let header = read_header(&data)?;

    let mut dec = Decoder::new(&data);
    // Skip past the header.
    dec.set_position(WAL_MAGIC.len() as u64)?;
    dec.read_u64()?;
    dec.read_string()?;
    dec.read_u64()?;
    dec.read_u64()?;
    dec.read_u64()?;

    let mut entries = Vec::new();
    loop {
        if dec.remaining() == 0 {
            break;
        }
        let record = (|| -> Result<(u64, WalEntry)> {
            let tag = dec.read_marker()?;
            let len = dec.read_len()? as usize;
            if dec.remaining() < len {
                return Err(Error::Recovery("truncated WAL record".into()));
            }
            let start = dec.position();
            let entry = if tag == marker::WAL_TRANSACTION_END {
                let ts = dec.read_u64()?;
                (ts, WalEntry::TransactionEnd)
            } else {
                let ts = dec.read_u64()?;
                let op = WalOp::decode_payload(tag, &mut dec)?;
                (ts, WalEntry::Op(op))
            };
            if dec.position() != start + len as u64 {
                return Err(Error::Recovery("WAL record length mismatch".into()));
            }
            Ok(entry)
        })();
        match record {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "stopping WAL read at damaged record: {e}"
                );
                break;
            }
        }
    }
    Ok((header, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_ops() -> Vec<WalOp> {
        vec![
            WalOp::VertexCreate { gid: Gid::new(1) },
            WalOp::VertexAddLabel {
                gid: Gid::new(1),
                label: "Person".into(),
            },
            WalOp::VertexSetProperty {
                gid: Gid::new(1),
                property: "name".into(),
                value: PropertyValue::from("Alice"),
            },
            WalOp::EdgeCreate {
                gid: Gid::new(1),
                from: Gid::new(1),
                to: Gid::new(2),
                edge_type: "KNOWS".into(),
            },
            WalOp::UniqueConstraintCreate {
                label: "Person".into(),
                properties: vec!["email".into(), "name".into()],
            },
        ]
    }

    #[test]
    fn transaction_roundtrip() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::new(
            dir.path().to_path_buf(),
            "test-uuid".into(),
            32 * 1024 * 1024,
            1,
            0,
        );
        let ops = sample_ops();
        writer.append_transaction(&ops, 17).unwrap();
        writer.finalize_current().unwrap();

        let path = dir.path().join(wal_file_name(17, 0));
        let (header, entries) = read_file(&path).unwrap();
        assert_eq!(header.uuid.as_str(), "test-uuid");
        assert_eq!(header.seq_num, 0);
        assert_eq!(header.from_ts, 17);
        assert_eq!(header.to_ts, 17);

        assert_eq!(entries.len(), ops.len() + 1);
        for (i, op) in ops.iter().enumerate() {
            assert_eq!(entries[i], (17, WalEntry::Op(op.clone())));
        }
        assert_eq!(*entries.last().unwrap(), (17, WalEntry::TransactionEnd));
    }

    #[test]
    fn open_file_reports_zero_to_ts() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::new(
            dir.path().to_path_buf(),
            "u".into(),
            32 * 1024 * 1024,
            1,
            5,
        );
        writer
            .append_transaction(&[WalOp::VertexCreate { gid: Gid::new(1) }], 3)
            .unwrap();

        // Not finalized yet: header says to_ts = 0.
        let path = dir.path().join(wal_file_name(3, 5));
        let data = fs::read(&path).unwrap();
        let header = read_header(&data).unwrap();
        assert_eq!(header.to_ts, 0);
        assert_eq!(header.seq_num, 5);
    }

    #[test]
    fn size_threshold_rotates_files() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::new(dir.path().to_path_buf(), "u".into(), 4096, 1, 0);

        // Each transaction carries a fat property to cross the threshold.
        let fat = PropertyValue::from("x".repeat(3000).as_str());
        for ts in 1..=3u64 {
            writer
                .append_transaction(
                    &[WalOp::VertexSetProperty {
                        gid: Gid::new(ts),
                        property: "blob".into(),
                        value: fat.clone(),
                    }],
                    ts,
                )
                .unwrap();
        }
        drop(writer);

        let mut files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert!(files.len() >= 2, "expected rotation, got {files:?}");
    }

    #[test]
    fn truncated_tail_drops_only_damaged_records() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::new(
            dir.path().to_path_buf(),
            "u".into(),
            32 * 1024 * 1024,
            1,
            0,
        );
        writer
            .append_transaction(&[WalOp::VertexCreate { gid: Gid::new(1) }], 5)
            .unwrap();
        writer
            .append_transaction(&[WalOp::VertexCreate { gid: Gid::new(2) }], 6)
            .unwrap();
        writer.finalize_current().unwrap();

        let path = dir.path().join(wal_file_name(5, 0));
        let full = fs::read(&path).unwrap();
        // Chop into the middle of the last record.
        fs::write(&path, &full[..full.len() - 5]).unwrap();

        let (_, entries) = read_file(&path).unwrap();
        // First transaction complete, second loses its end marker.
        assert!(entries.contains(&(5, WalEntry::TransactionEnd)));
        assert!(!entries.contains(&(6, WalEntry::TransactionEnd)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.wal");
        fs::write(&path, b"not a wal file at all").unwrap();
        assert!(read_file(&path).is_err());
    }
}
