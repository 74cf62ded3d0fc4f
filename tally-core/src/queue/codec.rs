//! Binary format of the persisted queue file.
//!
//! ```text
//! i32  format version (big-endian)
//! i32  record count
//! per record:
//!   utf  payload
//!   utf  event type
//!   repeated { u8 kind id, utf value }  terminated by 0xFF
//! ```
//!
//! `utf` is a big-endian u16 byte length followed by UTF-8 bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::identity::{IdentityKind, IdentitySet};

use super::EventRecord;

/// Bump whenever the layout above changes.
pub const FORMAT_VERSION: i32 = 1;

/// Ends the identity block of a record.
const IDENTITY_END: u8 = 0xFF;

/// Location of a persisted queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFile {
    path: PathBuf,
}

impl QueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write `records` to disk, replacing any previous content.
    ///
    /// The stream goes to a sibling temp file which is then renamed over the
    /// target, so a crash mid-write leaves the previous file intact.
    pub fn write<'a, I>(&self, records: I, count: usize) -> Result<()>
    where
        I: IntoIterator<Item = &'a EventRecord>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = i32::try_from(count)
            .map_err(|_| Error::Format(format!("too many records to store: {}", count)))?;

        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            out.write_all(&FORMAT_VERSION.to_be_bytes())?;
            out.write_all(&count.to_be_bytes())?;
            for record in records {
                encode_record(&mut out, record)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Read the stored records.
    ///
    /// Returns `Ok(None)` when there is no file, and
    /// [`Error::UnsupportedVersion`] when the file uses another format version.
    pub fn read(&self) -> Result<Option<Vec<EventRecord>>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut input = BufReader::new(file);

        let version = read_i32(&mut input)?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let count = read_i32(&mut input)?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Format(format!("negative record count {}", count)))?;

        let mut records = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            records.push(decode_record(&mut input)?);
        }
        Ok(Some(records))
    }

    /// Delete the file; a missing file is not an error.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode_record<W: Write>(out: &mut W, record: &EventRecord) -> Result<()> {
    write_utf(out, record.payload())?;
    write_utf(out, record.event_type())?;
    for (kind, value) in record.identities().stored() {
        out.write_all(&[kind.id()])?;
        write_utf(out, value)?;
    }
    out.write_all(&[IDENTITY_END])?;
    Ok(())
}

fn decode_record<R: Read>(input: &mut R) -> Result<EventRecord> {
    let payload = read_utf(input)?;
    let event_type = read_utf(input)?;

    let mut identities = IdentitySet::new();
    loop {
        let id = read_u8(input)?;
        if id == IDENTITY_END {
            break;
        }
        let value = read_utf(input)?;
        match IdentityKind::from_id(id) {
            Some(kind) if !kind.is_computed() => identities.set(kind, value),
            _ => tracing::debug!(kind_id = id, "Skipping unknown or computed identity"),
        }
    }

    Ok(EventRecord::from_parts(payload, event_type, identities))
}

fn write_utf<W: Write>(out: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        Error::Format(format!(
            "string of {} bytes exceeds the {} byte limit",
            value.len(),
            u16::MAX
        ))
    })?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

fn read_utf<R: Read>(input: &mut R) -> Result<String> {
    let mut len = [0u8; 2];
    input.read_exact(&mut len)?;
    let mut bytes = vec![0u8; usize::from(u16::from_be_bytes(len))];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| Error::Format(format!("invalid UTF-8: {}", e)))
}

fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

fn read_u8<R: Read>(input: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    input.read_exact(&mut byte)?;
    Ok(byte[0])
}
