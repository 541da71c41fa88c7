//! Shared in-memory contact index.
//!
//! Both the in-memory backend and the persistent backend keep their live
//! state in a `ContactIndex`; the persistent one additionally logs every
//! mutation before applying it here.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::contact::{sort_by_age, Contact, ContactId, LinkPrecedence, NewContact};
use crate::storage::traits::StorageError;

/// Contacts keyed by id plus lookup indexes on email, phone and link target.
#[derive(Debug, Clone, Default)]
pub struct ContactIndex {
    by_id: HashMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    last_id: u64,
}

impl ContactIndex {
    /// Number of stored contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Highest id handed out so far.
    #[must_use]
    pub const fn last_id(&self) -> u64 {
        self.last_id
    }

    /// The id the next `create` will receive.
    pub fn next_id(&self) -> Result<ContactId, StorageError> {
        self.last_id
            .checked_add(1)
            .map(ContactId::new)
            .ok_or_else(|| StorageError::BackendError("contact id space exhausted".to_string()))
    }

    /// Get a contact by id.
    #[must_use]
    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    /// Checks a pending create against the link invariants.
    pub fn validate_new(&self, contact: &NewContact) -> Result<(), StorageError> {
        match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, None) => Ok(()),
            (LinkPrecedence::Primary, Some(_)) => Err(StorageError::InvalidLink(
                "a primary contact cannot carry a linked id".to_string(),
            )),
            (LinkPrecedence::Secondary, None) => Err(StorageError::InvalidLink(
                "a secondary contact requires a linked id".to_string(),
            )),
            (LinkPrecedence::Secondary, Some(target)) => {
                if self.by_id.contains_key(&target) {
                    Ok(())
                } else {
                    Err(StorageError::InvalidLink(format!(
                        "linked contact {target} does not exist"
                    )))
                }
            }
        }
    }

    /// Checks a pending link update against the link invariants.
    pub fn validate_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        let current = self
            .by_id
            .get(&id)
            .ok_or(StorageError::ContactNotFound(id))?;

        match (link_precedence, linked_id) {
            (LinkPrecedence::Primary, _) if !current.is_primary() => {
                Err(StorageError::InvalidLink(format!(
                    "contact {id} is secondary and cannot be promoted"
                )))
            }
            (LinkPrecedence::Primary, Some(_)) => Err(StorageError::InvalidLink(
                "a primary contact cannot carry a linked id".to_string(),
            )),
            (LinkPrecedence::Primary, None) => Ok(()),
            (LinkPrecedence::Secondary, None) => Err(StorageError::InvalidLink(
                "a secondary contact requires a linked id".to_string(),
            )),
            (LinkPrecedence::Secondary, Some(target)) if target == id => Err(
                StorageError::InvalidLink(format!("contact {id} cannot link to itself")),
            ),
            (LinkPrecedence::Secondary, Some(target)) => {
                if self.by_id.contains_key(&target) {
                    Ok(())
                } else {
                    Err(StorageError::InvalidLink(format!(
                        "linked contact {target} does not exist"
                    )))
                }
            }
        }
    }

    /// Materializes a validated create with the given id and timestamp.
    #[must_use]
    pub fn materialize(contact: NewContact, id: ContactId, at: DateTime<Utc>) -> Contact {
        Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: at,
            updated_at: at,
        }
    }

    /// Inserts a contact as-is. Only the id must be unused.
    pub fn insert(&mut self, contact: Contact) -> Result<(), StorageError> {
        if self.by_id.contains_key(&contact.id) {
            return Err(StorageError::DuplicateKey(contact.id.to_string()));
        }

        if let Some(email) = contact.email.as_ref() {
            self.by_email.entry(email.clone()).or_default().insert(contact.id);
        }
        if let Some(phone) = contact.phone_number.as_ref() {
            self.by_phone.entry(phone.clone()).or_default().insert(contact.id);
        }
        if let Some(target) = contact.linked_id {
            self.by_linked.entry(target).or_default().insert(contact.id);
        }

        self.last_id = self.last_id.max(contact.id.get());
        self.by_id.insert(contact.id, contact);
        Ok(())
    }

    /// Applies a link update, re-indexing the old and new link target.
    pub fn set_link(
        &mut self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let contact = self
            .by_id
            .get_mut(&id)
            .ok_or(StorageError::ContactNotFound(id))?;

        let previous = contact.linked_id;
        contact.link_precedence = link_precedence;
        contact.linked_id = linked_id;
        contact.updated_at = at;

        if previous != linked_id {
            if let Some(old) = previous {
                if let Some(set) = self.by_linked.get_mut(&old) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_linked.remove(&old);
                    }
                }
            }
            if let Some(new) = linked_id {
                self.by_linked.entry(new).or_default().insert(id);
            }
        }
        Ok(())
    }

    /// Records matching `email` OR `phone_number`, oldest first.
    #[must_use]
    pub fn matching(&self, email: Option<&str>, phone_number: Option<&str>) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        if let Some(set) = email.and_then(|e| self.by_email.get(e)) {
            ids.extend(set.iter().copied());
        }
        if let Some(set) = phone_number.and_then(|p| self.by_phone.get(p)) {
            ids.extend(set.iter().copied());
        }
        self.collect(ids)
    }

    /// Records whose id is in `ids`, oldest first.
    #[must_use]
    pub fn by_ids(&self, ids: &[ContactId]) -> Vec<Contact> {
        self.collect(ids.iter().copied().collect())
    }

    /// Records whose id or link target is in `ids`, oldest first.
    #[must_use]
    pub fn by_ids_or_linked(&self, ids: &[ContactId]) -> Vec<Contact> {
        let mut out: BTreeSet<ContactId> = ids.iter().copied().collect();
        for id in ids {
            if let Some(set) = self.by_linked.get(id) {
                out.extend(set.iter().copied());
            }
        }
        self.collect(out)
    }

    /// Every stored contact by reference, in id order.
    ///
    /// Unlike [`ContactIndex::all`] nothing is cloned, which is what a
    /// snapshot writer walking a large index wants.
    #[must_use]
    pub fn in_id_order(&self) -> Vec<&Contact> {
        let mut contacts: Vec<&Contact> = self.by_id.values().collect();
        contacts.sort_unstable_by_key(|c| c.id);
        contacts
    }

    /// Every stored contact, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.by_id.values().cloned().collect();
        sort_by_age(&mut contacts);
        contacts
    }

    fn collect(&self, ids: BTreeSet<ContactId>) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = ids
            .into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect();
        sort_by_age(&mut contacts);
        contacts
    }
}
