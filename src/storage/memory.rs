//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`ContactStore`]. It is intended for embedded usage, tests, and as a
//! reference implementation.

use std::sync::{Arc, Mutex, RwLock};

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::storage::index::ContactIndex;
use crate::storage::traits::{ContactStore, StorageError};
use crate::time::{Clock, SystemClock};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
///
/// Ids are assigned sequentially starting at 1.
#[derive(Debug)]
pub struct InMemoryContactStore {
    state: RwLock<ContactIndex>,
    clock: Arc<dyn Clock>,
    resolution: Mutex<()>,
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryContactStore {
    /// Create a new empty store stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(ContactIndex::default()),
            clock,
            resolution: Mutex::new(()),
        }
    }

    /// Insert a fully-formed record, bypassing link validation.
    ///
    /// Meant for fixtures and bulk imports that must reproduce an existing
    /// graph verbatim, including graphs that violate the link invariants.
    pub fn insert_raw(&self, contact: Contact) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.insert_raw"))?;
        state.insert(contact)
    }

    /// Snapshot of every stored record, oldest first.
    pub fn snapshot(&self) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.snapshot"))?;
        Ok(state.all())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.len"))?;
        Ok(state.len())
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactStore for InMemoryContactStore {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.find_matching"))?;
        Ok(state.matching(email, phone_number))
    }

    fn find_by_ids(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.find_by_ids"))?;
        Ok(state.by_ids(ids))
    }

    fn find_by_ids_or_linked(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("contact.find_by_ids_or_linked"))?;
        Ok(state.by_ids_or_linked(ids))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.get"))?;
        Ok(state.get(id).cloned())
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.create"))?;
        state.validate_new(&contact)?;

        let id = state.next_id()?;
        let created = ContactIndex::materialize(contact, id, self.clock.now());
        state.insert(created.clone())?;
        Ok(created)
    }

    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.update_link"))?;
        state.validate_link(id, link_precedence, linked_id)?;
        state.set_link(id, link_precedence, linked_id, self.clock.now())
    }

    fn resolution_lock(&self) -> Option<&Mutex<()>> {
        Some(&self.resolution)
    }
}
