//! Abstract storage traits for idlink.
//!
//! The consolidation engine never follows pointers in memory; every hop
//! through the link graph is a batched lookup against a [`ContactStore`].
//! That keeps the algorithm identical across backends:
//! - In-memory backend for tests and embedded use
//! - Persistent backend for production

use std::sync::Mutex;

use thiserror::Error;

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A create or update would break the link invariants.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for contact records.
///
/// Every finder returns records ordered by `created_at` ascending with `id`
/// as the tie-break, so callers observe a deterministic fetch order.
///
/// # Safety Considerations
/// - `create` and `update_link` must each be atomic for a single record
/// - Implementations should handle concurrent access safely
pub trait ContactStore: Send + Sync {
    /// Records whose email equals `email` OR whose phone equals `phone_number`.
    ///
    /// An absent argument does not participate in the match. With both absent
    /// the result is empty.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Records whose id is in `ids`.
    fn find_by_ids(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError>;

    /// Records whose id is in `ids` OR whose `linked_id` is in `ids`.
    fn find_by_ids_or_linked(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError>;

    /// Get a contact by id.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Create a record, assigning its id and timestamps.
    ///
    /// # Errors
    /// - `InvalidLink`: a primary with a `linked_id`, a secondary without one,
    ///   or a secondary pointing at a missing record
    fn create(&self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Set a record's link fields.
    ///
    /// # Errors
    /// - `ContactNotFound`: `id` does not exist
    /// - `InvalidLink`: self-links, missing targets, a secondary without a
    ///   target, or promoting a secondary back to primary
    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError>;

    /// Optional scope that serializes whole resolutions against this store.
    ///
    /// When present, the engine holds the lock from seed lookup to the last
    /// write of a resolution so that concurrent resolutions cannot interleave.
    fn resolution_lock(&self) -> Option<&Mutex<()>> {
        None
    }
}
