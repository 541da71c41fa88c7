//! Write-ahead log for contact mutations.
//!
//! Every create and link update is appended (and optionally fsynced) before
//! it is applied to the in-memory index. On open, entries newer than the
//! last snapshot are replayed.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of WalEntry]
//! [ENTRY 2: codec frame of WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contact::{Contact, ContactId, LinkPrecedence};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number; survives truncation.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The mutation carried by a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A record was created (fully materialized, id and timestamps included).
    ContactCreate(Contact),
    /// A record's link fields changed.
    ContactLink {
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
        at: DateTime<Utc>,
    },
    /// Everything up to `up_to_sequence` is in the snapshot.
    Checkpoint { up_to_sequence: u64 },
}

struct WalWriter {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only write-ahead log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create the log at `path`.
    ///
    /// New entries are numbered after the larger of the last readable entry
    /// and `floor`; pass the snapshot's sequence as `floor` so numbering
    /// keeps increasing after a truncation.
    pub fn open(path: &Path, sync_on_write: bool, floor: u64) -> IoResult<Self> {
        let has_header = path.exists() && std::fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let last = if has_header {
            let scan = Self::scan(path)?;
            if let Some(torn_at) = scan.torn_at {
                // Drop the partial frame so new entries follow the last good one.
                warn!(offset = torn_at, after_sequence = scan.last, "truncating torn WAL tail");
                OpenOptions::new().write(true).open(path)?.set_len(torn_at)?;
            }
            scan.last
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                out: BufWriter::new(file),
                sequence: last.max(floor),
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.writer"))
    }

    /// Append an entry, returning its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.lock()?;

        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        writer.out.write_all(&encoded)?;
        writer.out.flush()?;
        if self.sync_on_write {
            writer.out.get_ref().sync_all()?;
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterate over all entries in the log.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop every entry, keeping the sequence counter.
    ///
    /// Only call this once a snapshot covering the current sequence is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.out.flush()?;

        // set_len on the append handle rewinds the file in place.
        let file = writer.out.get_mut();
        file.set_len(0)?;
        codec::write_header(file)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    fn scan(path: &Path) -> IoResult<Scan> {
        let mut iter = WalIterator::new(path)?;
        let mut last = 0;
        let mut corrupt = false;
        for entry in iter.by_ref() {
            match entry {
                Ok(entry) => last = entry.sequence,
                Err(e) => {
                    // Replay reports this properly; here we only need a starting point.
                    warn!(after_sequence = last, error = %e, "WAL corruption detected");
                    corrupt = true;
                    break;
                }
            }
        }
        let torn_at = (!corrupt && iter.valid_end < iter.file_size).then_some(iter.valid_end);
        Ok(Scan { last, torn_at })
    }
}

struct Scan {
    last: u64,
    torn_at: Option<u64>,
}

/// Iterator over WAL entries.
///
/// A frame cut short at the end of the file (a torn write) ends iteration
/// quietly; any other decoding failure is yielded as an error.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    valid_end: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self {
            reader,
            file_size,
            valid_end: codec::HEADER_LEN,
        })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    self.valid_end = pos;
                    Some(Ok(entry))
                }
                Err(e) => Some(Err(e)),
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
