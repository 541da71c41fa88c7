//! Durable contact store.
//!
//! Live state is a [`ContactIndex`] in memory. Each mutation is validated
//! against it, appended to the WAL and only then applied, all under the
//! index write lock, so the log order always matches the applied order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::error::{ExecutionError, IdentityError, IdentityResult};
use crate::storage::index::ContactIndex;
use crate::storage::traits::{ContactStore, StorageError};
use crate::time::{Clock, SystemClock};

use super::file_lock::FileLock;
use super::snapshot::{Snapshot, SnapshotData};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// WAL file name inside the data directory.
const WAL_FILE: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn open_err(what: &str, e: impl std::fmt::Display) -> IdentityError {
    IdentityError::Execution(ExecutionError::StoreUnavailable {
        source: StorageError::BackendError(format!("failed to {what}: {e}")),
    })
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Contacts written to the snapshot.
    pub contacts: usize,
    /// WAL sequence covered by the snapshot.
    pub sequence: u64,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// Single-process durable implementation of [`ContactStore`].
pub struct PersistentContactStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    snapshot: Snapshot,
    index: RwLock<ContactIndex>,
    clock: Arc<dyn Clock>,
    config: PersistentConfig,
    /// WAL size at which the next automatic compaction is attempted.
    compact_at: AtomicU64,
    resolution: Mutex<()>,
}

impl std::fmt::Debug for PersistentContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentContactStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl PersistentContactStore {
    /// Open or create a store in `dir` using the system clock.
    ///
    /// # Errors
    /// - the directory cannot be created or locked
    /// - the snapshot cannot be read
    /// - the WAL contains a corrupt entry (a torn final entry is tolerated)
    pub fn open(dir: &Path, config: PersistentConfig) -> IdentityResult<Self> {
        Self::open_with_clock(dir, config, Arc::new(SystemClock))
    }

    /// Open or create a store in `dir` stamped by `clock`.
    ///
    /// # Errors
    /// Same as [`PersistentContactStore::open`].
    pub fn open_with_clock(
        dir: &Path,
        config: PersistentConfig,
        clock: Arc<dyn Clock>,
    ) -> IdentityResult<Self> {
        let config = config.validate()?;
        fs::create_dir_all(dir).map_err(|e| open_err("create data directory", e))?;
        let lock = FileLock::acquire(dir).map_err(|e| open_err("acquire lock", e))?;

        let snapshot = Snapshot::in_dir(dir);
        let SnapshotData {
            sequence: snapshot_sequence,
            contacts,
            ..
        } = snapshot.load().map_err(|e| open_err("load snapshot", e))?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write, snapshot_sequence)
            .map_err(|e| open_err("open WAL", e))?;

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            snapshot,
            index: RwLock::new(contacts),
            clock,
            compact_at: AtomicU64::new(config.max_wal_size),
            config,
            resolution: Mutex::new(()),
        };
        store.replay_wal(snapshot_sequence)?;
        Ok(store)
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal
            .size_bytes()
            .map_err(|e| StorageError::BackendError(format!("WAL stat failed: {e}")))
    }

    /// Number of stored contacts.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index.read().map_err(|_| lock_err("contact.len"))?.len())
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn replay_wal(&self, after: u64) -> IdentityResult<()> {
        let iter = self.wal.iter().map_err(|e| open_err("iterate WAL", e))?;
        let mut index = self
            .index
            .write()
            .map_err(|_| IdentityError::from(lock_err("contact.replay")))?;

        let mut applied = 0usize;
        let mut skipped = 0usize;
        for entry in iter {
            let entry = entry.map_err(|e| open_err("read WAL entry", e))?;
            if entry.sequence <= after {
                skipped += 1;
                continue;
            }
            apply(&mut index, &entry.kind).map_err(|e| {
                open_err(&format!("apply WAL entry {}", entry.sequence), e)
            })?;
            applied += 1;
        }

        if applied > 0 || skipped > 0 {
            info!(applied, skipped, contacts = index.len(), "replayed WAL");
        }
        Ok(())
    }

    /// Fold the WAL into a fresh snapshot and truncate it.
    ///
    /// Safe to call at any time: if it fails part way, the WAL still holds
    /// every mutation and is replayed on the next open.
    ///
    /// # Errors
    /// Returns `StorageError::BackendError` if the snapshot or WAL cannot be written.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        // Holding the write lock keeps writers out until the WAL is truncated.
        let index = self.index.write().map_err(|_| lock_err("contact.compact"))?;
        self.compact_locked(&index)
    }

    fn compact_locked(
        &self,
        index: &RwLockWriteGuard<'_, ContactIndex>,
    ) -> Result<CompactionResult, StorageError> {
        let io = |what: &str, e: std::io::Error| {
            StorageError::BackendError(format!("compaction failed to {what}: {e}"))
        };

        let wal_size_before = self.wal.size_bytes().map_err(|e| io("stat WAL", e))?;
        let sequence = self
            .wal
            .current_sequence()
            .map_err(|e| io("read WAL sequence", e))?;

        self.snapshot
            .store(sequence, self.clock.now(), index)
            .map_err(|e| io("write snapshot", e))?;

        self.wal
            .append(WalEntryKind::Checkpoint {
                up_to_sequence: sequence,
            })
            .map_err(|e| io("write checkpoint", e))?;
        self.wal.truncate().map_err(|e| io("truncate WAL", e))?;

        let result = CompactionResult {
            contacts: index.len(),
            sequence,
            wal_size_before,
            wal_size_after: self.wal.size_bytes().map_err(|e| io("stat WAL", e))?,
        };
        info!(
            contacts = result.contacts,
            sequence,
            wal_size_before,
            wal_size_after = result.wal_size_after,
            "compacted WAL into snapshot"
        );
        Ok(result)
    }

    fn log_and_apply(
        &self,
        index: &mut RwLockWriteGuard<'_, ContactIndex>,
        kind: WalEntryKind,
    ) -> Result<(), StorageError> {
        self.wal
            .append(kind.clone())
            .map_err(|e| StorageError::BackendError(format!("WAL write failed: {e}")))?;
        apply(index, &kind)?;
        self.maybe_compact(index);
        Ok(())
    }

    fn maybe_compact(&self, index: &RwLockWriteGuard<'_, ContactIndex>) {
        let Ok(size) = self.wal.size_bytes() else {
            return;
        };
        if size < self.compact_at.load(Ordering::Relaxed) {
            return;
        }
        debug!(size, limit = self.config.max_wal_size, "WAL over limit");
        // The write that triggered this is already durable in the WAL.
        match self.compact_locked(index) {
            Ok(_) => self
                .compact_at
                .store(self.config.max_wal_size, Ordering::Relaxed),
            Err(e) => {
                // Let the WAL grow by another full limit before trying again.
                let retry_at = size.saturating_add(self.config.max_wal_size);
                warn!(error = %e, retry_at, "automatic compaction failed");
                self.compact_at.store(retry_at, Ordering::Relaxed);
            }
        }
    }
}

fn apply(index: &mut ContactIndex, kind: &WalEntryKind) -> Result<(), StorageError> {
    match kind {
        WalEntryKind::ContactCreate(contact) => match index.get(contact.id) {
            // Already present: the entry predates a snapshot that was
            // written but whose checkpoint never made it into the WAL.
            Some(existing) if existing == contact => Ok(()),
            _ => index.insert(contact.clone()),
        },
        WalEntryKind::ContactLink {
            id,
            link_precedence,
            linked_id,
            at,
        } => index.set_link(*id, *link_precedence, *linked_id, *at),
        WalEntryKind::Checkpoint { .. } => Ok(()),
    }
}

impl ContactStore for PersistentContactStore {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.find_matching"))?;
        Ok(index.matching(email, phone_number))
    }

    fn find_by_ids(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.find_by_ids"))?;
        Ok(index.by_ids(ids))
    }

    fn find_by_ids_or_linked(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("contact.find_by_ids_or_linked"))?;
        Ok(index.by_ids_or_linked(ids))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.get"))?;
        Ok(index.get(id).cloned())
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.create"))?;
        index.validate_new(&contact)?;

        let id = index.next_id()?;
        let created = ContactIndex::materialize(contact, id, self.clock.now());
        self.log_and_apply(&mut index, WalEntryKind::ContactCreate(created.clone()))?;
        Ok(created)
    }

    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("contact.update_link"))?;
        index.validate_link(id, link_precedence, linked_id)?;

        self.log_and_apply(
            &mut index,
            WalEntryKind::ContactLink {
                id,
                link_precedence,
                linked_id,
                at: self.clock.now(),
            },
        )
    }

    fn resolution_lock(&self) -> Option<&Mutex<()>> {
        Some(&self.resolution)
    }
}
