//! The self-describing binary codec shared by snapshots and the WAL.
//!
//! Integers are little-endian fixed width, strings are u32-length-prefixed
//! UTF-8, and every property value starts with a one-byte kind tag so a
//! reader can [`skip`](Decoder::skip_value) values it doesn't care about
//! without allocating.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use arcstr::ArcStr;
use quiver_common::types::PropertyValue;
use quiver_common::{Error, Result};

use super::marker;

/// Streaming writer with position tracking.
///
/// Backed by a buffered file for snapshot/WAL output, or by a `Vec<u8>`
/// when a record payload must be sized before it is written out.
pub struct Encoder<W: Write> {
    writer: W,
    position: u64,
}

/// File-backed encoder used for snapshot and WAL files.
pub type FileEncoder = Encoder<BufWriter<File>>;

impl FileEncoder {
    /// Creates (truncating) the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            position: 0,
        })
    }

    /// Flushes and fsyncs.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl<'a> Encoder<&'a mut Vec<u8>> {
    /// Wraps a byte buffer for in-memory payload assembly.
    pub fn buffer(buf: &'a mut Vec<u8>) -> Self {
        let position = buf.len() as u64;
        Self {
            writer: buf,
            position,
        }
    }
}

impl<W: Write> Encoder<W> {
    /// Current write position in bytes.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Writes a little-endian u64.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian i64.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian f64.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u32 length.
    pub fn write_len(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u32-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        self.write_len(bytes.len() as u32)?;
        self.write_bytes(bytes)
    }

    /// Writes a tagged property value.
    pub fn write_value(&mut self, value: &PropertyValue) -> Result<()> {
        match value {
            PropertyValue::Null => self.write_u8(marker::TYPE_NULL),
            PropertyValue::Bool(b) => {
                self.write_u8(marker::TYPE_BOOL)?;
                self.write_u8(u8::from(*b))
            }
            PropertyValue::Int(i) => {
                self.write_u8(marker::TYPE_INT)?;
                self.write_i64(*i)
            }
            PropertyValue::Double(d) => {
                self.write_u8(marker::TYPE_DOUBLE)?;
                self.write_f64(*d)
            }
            PropertyValue::String(s) => {
                self.write_u8(marker::TYPE_STRING)?;
                self.write_string(s)
            }
            PropertyValue::List(items) => {
                self.write_u8(marker::TYPE_LIST)?;
                self.write_len(items.len() as u32)?;
                for item in items {
                    self.write_value(item)?;
                }
                Ok(())
            }
            PropertyValue::Map(entries) => {
                self.write_u8(marker::TYPE_MAP)?;
                self.write_len(entries.len() as u32)?;
                for (key, item) in entries {
                    self.write_string(key)?;
                    self.write_value(item)?;
                }
                Ok(())
            }
        }
    }

    /// Flushes buffered bytes.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek> Encoder<W> {
    /// Seeks to `position` for offset back-patching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on seek failure.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.writer.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }
}

/// In-memory reader over a fully loaded file.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Wraps a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn truncated() -> Error {
        Error::Recovery("unexpected end of file".into())
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Moves the read position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recovery`] if the position lies past the end.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        if position as usize > self.data.len() {
            return Err(Self::truncated());
        }
        self.pos = position as usize;
        Ok(())
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Self::truncated());
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    /// Reads a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    /// Reads a little-endian f64.
    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    /// Reads a u32 length prefix.
    pub fn read_len(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<ArcStr> {
        let len = self.read_len()? as usize;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| Error::Recovery("invalid UTF-8 in string".into()))?;
        Ok(ArcStr::from(s))
    }

    /// Reads and returns the next marker byte.
    pub fn read_marker(&mut self) -> Result<u8> {
        self.read_u8()
    }

    /// Reads the next marker byte and checks it against `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recovery`] if the marker differs.
    pub fn expect_marker(&mut self, expected: u8) -> Result<()> {
        let found = self.read_u8()?;
        if found != expected {
            return Err(Error::Recovery(format!(
                "expected marker {expected:#04x}, found {found:#04x}"
            )));
        }
        Ok(())
    }

    /// Reads a tagged property value.
    pub fn read_value(&mut self) -> Result<PropertyValue> {
        let tag = self.read_u8()?;
        match tag {
            marker::TYPE_NULL => Ok(PropertyValue::Null),
            marker::TYPE_BOOL => Ok(PropertyValue::Bool(self.read_u8()? != 0)),
            marker::TYPE_INT => Ok(PropertyValue::Int(self.read_i64()?)),
            marker::TYPE_DOUBLE => Ok(PropertyValue::Double(self.read_f64()?)),
            marker::TYPE_STRING => Ok(PropertyValue::String(self.read_string()?)),
            marker::TYPE_LIST => {
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(PropertyValue::List(items))
            }
            marker::TYPE_MAP => {
                let count = self.read_len()?;
                let mut entries = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_string()?;
                    entries.insert(key, self.read_value()?);
                }
                Ok(PropertyValue::Map(entries))
            }
            other => Err(Error::Recovery(format!("unknown value tag {other:#04x}"))),
        }
    }

    /// Advances past one tagged value without building it.
    pub fn skip_value(&mut self) -> Result<()> {
        let tag = self.read_u8()?;
        match tag {
            marker::TYPE_NULL => Ok(()),
            marker::TYPE_BOOL => self.take(1).map(|_| ()),
            marker::TYPE_INT | marker::TYPE_DOUBLE => self.take(8).map(|_| ()),
            marker::TYPE_STRING => {
                let len = self.read_len()? as usize;
                self.take(len).map(|_| ())
            }
            marker::TYPE_LIST => {
                let count = self.read_len()?;
                for _ in 0..count {
                    self.skip_value()?;
                }
                Ok(())
            }
            marker::TYPE_MAP => {
                let count = self.read_len()?;
                for _ in 0..count {
                    let len = self.read_len()? as usize;
                    self.take(len)?;
                    self.skip_value()?;
                }
                Ok(())
            }
            other => Err(Error::Recovery(format!("unknown value tag {other:#04x}"))),
        }
    }
}
