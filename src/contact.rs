//! Contact records and identity facts.
//!
//! A contact is the only persisted entity. Contacts are linked into
//! components; each component has exactly one primary contact and every
//! other member points straight at it through `linked_id`.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store-assigned contact identifier.
///
/// Ids are handed out by the record store on creation and never change.
///
/// # Examples
///
/// ```
/// use idlink::ContactId;
///
/// let id = ContactId::new(42);
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Whether a contact is the canonical record of its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical record; `linked_id` is `None`.
    Primary,
    /// Merged record; `linked_id` names the primary.
    Secondary,
}

impl LinkPrecedence {
    /// Returns true for [`LinkPrecedence::Primary`].
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Store-assigned id.
    pub id: ContactId,
    /// Email address, if known.
    pub email: Option<String>,
    /// Phone number, if known.
    pub phone_number: Option<String>,
    /// Primary this record is linked to (secondaries only).
    pub linked_id: Option<ContactId>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// Creation time; orders records within a component.
    pub created_at: DateTime<Utc>,
    /// Last time the link fields changed.
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Returns true if this record is currently a primary.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.link_precedence.is_primary()
    }

    /// Total order used for canonical selection: `created_at`, then `id`.
    #[must_use]
    pub fn age_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Returns true if the record carries the given email.
    #[must_use]
    pub fn has_email(&self, email: &str) -> bool {
        self.email.as_deref() == Some(email)
    }

    /// Returns true if the record carries the given phone number.
    #[must_use]
    pub fn has_phone(&self, phone: &str) -> bool {
        self.phone_number.as_deref() == Some(phone)
    }
}

/// Sorts contacts oldest first with id as the tie-break.
pub fn sort_by_age(contacts: &mut [Contact]) {
    contacts.sort_by(Contact::age_cmp);
}

/// Fields for a record about to be created; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    /// Email address, if known.
    pub email: Option<String>,
    /// Phone number, if known.
    pub phone_number: Option<String>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// Primary to link to (secondaries only).
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// A fresh primary carrying the given fact.
    #[must_use]
    pub fn primary(fact: &ContactFact) -> Self {
        Self {
            email: fact.email().map(str::to_owned),
            phone_number: fact.phone_number().map(str::to_owned),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// A secondary of `primary` carrying the given fact.
    #[must_use]
    pub fn secondary(fact: &ContactFact, primary: ContactId) -> Self {
        Self {
            email: fact.email().map(str::to_owned),
            phone_number: fact.phone_number().map(str::to_owned),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary),
        }
    }
}

/// The identity fact being resolved: an email, a phone number, or both.
///
/// Construction guarantees at least one field is present and non-empty.
/// An empty string is treated as "not given".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContactFact {
    email: Option<String>,
    phone_number: Option<String>,
}

impl ContactFact {
    /// Maximum accepted length, in bytes, for either field.
    ///
    /// 320 is the longest valid email address (64-byte local part, `@`,
    /// 255-byte domain).
    pub const MAX_FIELD_LEN: usize = 320;

    /// Builds a fact from optional parts.
    ///
    /// # Errors
    ///
    /// - `ValidationError::MissingContactFact` if neither part is a non-empty string
    /// - `ValidationError::FieldTooLong` if a part exceeds [`Self::MAX_FIELD_LEN`]
    ///
    /// # Examples
    ///
    /// ```
    /// use idlink::ContactFact;
    ///
    /// let fact = ContactFact::new(Some("doc@hillvalley.edu".into()), None).unwrap();
    /// assert_eq!(fact.email(), Some("doc@hillvalley.edu"));
    ///
    /// assert!(ContactFact::new(Some(String::new()), None).is_err());
    /// ```
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, ValidationError> {
        let email = email.filter(|s| !s.is_empty());
        let phone_number = phone_number.filter(|s| !s.is_empty());

        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingContactFact);
        }
        check_len("email", email.as_deref())?;
        check_len("phoneNumber", phone_number.as_deref())?;

        Ok(Self {
            email,
            phone_number,
        })
    }

    /// Fact with only an email.
    ///
    /// # Errors
    ///
    /// Same as [`ContactFact::new`].
    pub fn email_only(email: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), None)
    }

    /// Fact with only a phone number.
    ///
    /// # Errors
    ///
    /// Same as [`ContactFact::new`].
    pub fn phone_only(phone_number: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(None, Some(phone_number.into()))
    }

    /// Fact with both parts.
    ///
    /// # Errors
    ///
    /// Same as [`ContactFact::new`].
    pub fn both(
        email: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), Some(phone_number.into()))
    }

    /// The email, if given.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The phone number, if given.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// Returns true if every given part already appears somewhere in `contacts`.
    #[must_use]
    pub fn is_known_to(&self, contacts: &[Contact]) -> bool {
        let email_known = self
            .email()
            .map_or(true, |email| contacts.iter().any(|c| c.has_email(email)));
        let phone_known = self
            .phone_number()
            .map_or(true, |phone| contacts.iter().any(|c| c.has_phone(phone)));
        email_known && phone_known
    }
}

fn check_len(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.len() > ContactFact::MAX_FIELD_LEN => Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: ContactFact::MAX_FIELD_LEN,
        }),
        _ => Ok(()),
    }
}
