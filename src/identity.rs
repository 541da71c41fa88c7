//! Consolidated identity view.
//!
//! `ConsolidatedIdentity` is what a resolution returns: the primary id plus
//! every email, phone number and secondary id of the primary's group, with
//! duplicates removed. `IdentifyResponse` wraps it in the `{"contact": ...}`
//! envelope callers receive over the wire.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};

/// Deduplicated summary of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    /// Id of the canonical record.
    pub primary_contact_id: ContactId,
    /// Distinct emails, primary's first.
    pub emails: Vec<String>,
    /// Distinct phone numbers, primary's first.
    pub phone_numbers: Vec<String>,
    /// Every other group member, in fetch order.
    pub secondary_contact_ids: Vec<ContactId>,
}

impl ConsolidatedIdentity {
    /// Identity consisting of a single, freshly created primary.
    #[must_use]
    pub fn singleton(contact: &Contact) -> Self {
        Self {
            primary_contact_id: contact.id,
            emails: contact.email.iter().cloned().collect(),
            phone_numbers: contact.phone_number.iter().cloned().collect(),
            secondary_contact_ids: Vec::new(),
        }
    }

    /// Assembles the view of `primary`'s group.
    ///
    /// `group` is the primary together with every record linked to it, in
    /// the order the store returned them. The primary's own email and phone
    /// lead their lists; the rest follow group order with duplicates dropped.
    /// Records other than the primary become `secondary_contact_ids` in group
    /// order. The primary does not have to be present in `group`; its
    /// snapshot is used for the leading entries either way.
    #[must_use]
    pub fn assemble(primary: &Contact, group: &[Contact]) -> Self {
        let mut emails = DistinctList::default();
        let mut phones = DistinctList::default();

        let current_primary = group.iter().find(|c| c.id == primary.id).unwrap_or(primary);
        emails.push(current_primary.email.as_deref());
        phones.push(current_primary.phone_number.as_deref());

        let mut secondary_contact_ids = Vec::with_capacity(group.len().saturating_sub(1));
        for contact in group {
            emails.push(contact.email.as_deref());
            phones.push(contact.phone_number.as_deref());
            if contact.id != primary.id {
                secondary_contact_ids.push(contact.id);
            }
        }

        Self {
            primary_contact_id: primary.id,
            emails: emails.into_vec(),
            phone_numbers: phones.into_vec(),
            secondary_contact_ids,
        }
    }
}

#[derive(Default)]
struct DistinctList {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl DistinctList {
    fn push(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        if self.seen.insert(value.to_owned()) {
            self.items.push(value.to_owned());
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

/// Wire envelope: `{"contact": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The consolidated identity.
    pub contact: ConsolidatedIdentity,
}

impl From<ConsolidatedIdentity> for IdentifyResponse {
    fn from(contact: ConsolidatedIdentity) -> Self {
        Self { contact }
    }
}
