//! Compacted snapshot of the contact index.
//!
//! Compaction writes the whole index into `contacts.snap` so the WAL can be
//! truncated. The file is written to a temporary sibling, fsynced, then
//! renamed over the old snapshot, so a crash leaves either the old or the
//! new snapshot in place, never a torn one.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [HEADER: codec frame of SnapshotHeader]
//! [CHUNK 1: codec frame of up to CHUNK_LEN contacts]
//! [CHUNK 2: ...]
//! ```
//! Contacts are split into bounded chunks so no single frame grows with the
//! size of the store.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::Contact;
use crate::storage::index::ContactIndex;

use super::codec;

/// Contacts per chunk frame.
pub const CHUNK_LEN: usize = 1024;

/// Leading frame of a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotHeader {
    sequence: u64,
    taken_at: DateTime<Utc>,
    contacts: u64,
    chunks: u64,
}

/// Snapshot contents.
#[derive(Debug, Clone, Default)]
pub struct SnapshotData {
    /// Last WAL sequence folded into this snapshot.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub taken_at: Option<DateTime<Utc>>,
    /// The contacts.
    pub contacts: ContactIndex,
}

/// Location of the snapshot file within a data directory.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

fn invalid(msg: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, msg)
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl Snapshot {
    /// Snapshot file name inside the data directory.
    pub const FILE_NAME: &'static str = "contacts.snap";

    /// Snapshot handle for `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot; a missing file is an empty snapshot.
    ///
    /// # Errors
    /// - `InvalidData` if a frame is corrupt, a contact id repeats, or the
    ///   chunk or contact count disagrees with the header
    /// - `UnexpectedEof` if the file ends before the last chunk
    pub fn load(&self) -> IoResult<SnapshotData> {
        if !self.path.exists() {
            return Ok(SnapshotData::default());
        }
        let mut reader = BufReader::new(File::open(&self.path)?);
        codec::read_header(&mut reader)?;
        let header: SnapshotHeader = codec::decode(&mut reader)?;

        let mut contacts = ContactIndex::default();
        for chunk in 0..header.chunks {
            let batch: Vec<Contact> = codec::decode(&mut reader)?;
            for contact in batch {
                contacts
                    .insert(contact)
                    .map_err(|e| invalid(format!("snapshot chunk {chunk}: {e}")))?;
            }
        }

        if to_u64(contacts.len()) != header.contacts {
            return Err(invalid(format!(
                "snapshot holds {} contacts, header says {}",
                contacts.len(),
                header.contacts
            )));
        }

        Ok(SnapshotData {
            sequence: header.sequence,
            taken_at: Some(header.taken_at),
            contacts,
        })
    }

    /// Atomically replaces the snapshot with `contacts` as of `sequence`.
    pub fn store(
        &self,
        sequence: u64,
        taken_at: DateTime<Utc>,
        contacts: &ContactIndex,
    ) -> IoResult<()> {
        let ordered = contacts.in_id_order();
        let header = SnapshotHeader {
            sequence,
            taken_at,
            contacts: to_u64(ordered.len()),
            chunks: to_u64(ordered.len().div_ceil(CHUNK_LEN)),
        };

        let tmp = self.path.with_extension("snap.tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            codec::write_header(&mut writer)?;
            writer.write_all(&codec::encode(&header)?)?;
            for chunk in ordered.chunks(CHUNK_LEN) {
                writer.write_all(&codec::encode(&chunk)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        sync_dir(self.path.parent())
    }
}

#[cfg(unix)]
fn sync_dir(dir: Option<&Path>) -> IoResult<()> {
    match dir {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: Option<&Path>) -> IoResult<()> {
    Ok(())
}
