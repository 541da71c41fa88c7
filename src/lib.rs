//! # idlink - Contact identity consolidation
//!
//! idlink keeps a graph of contact records, each carrying an email, a phone
//! number, or both. Records that share either value describe the same
//! person. Every such group has exactly one *primary* contact (the oldest)
//! and any number of *secondary* contacts pointing straight at it.
//!
//! Resolving a new fact either creates a fresh identity, attaches a new
//! secondary, or merges previously separate identities under the oldest
//! primary. The result is always the consolidated view of the group.
//!
//! ## Core Concepts
//!
//! - **Contact**: a stored record with link precedence and timestamps
//! - **ContactFact**: the validated input, at least one of email or phone
//! - **ContactStore**: the storage seam; in-memory and persistent backends ship here
//! - **IdentityEngine**: runs resolution against a store
//! - **ConsolidatedIdentity**: the response view of a group
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use idlink::{IdentityEngine, InMemoryContactStore};
//!
//! let engine = IdentityEngine::new(Arc::new(InMemoryContactStore::new()));
//!
//! let first = engine
//!     .identify(Some("doc@hillvalley.edu".into()), Some("123456".into()))
//!     .unwrap();
//! let second = engine
//!     .identify(Some("emmett@hillvalley.edu".into()), Some("123456".into()))
//!     .unwrap();
//!
//! assert_eq!(first.primary_contact_id, second.primary_contact_id);
//! assert_eq!(second.emails, ["doc@hillvalley.edu", "emmett@hillvalley.edu"]);
//! assert_eq!(second.secondary_contact_ids.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod contact;
pub mod error;
pub mod identity;
pub mod time;

// Storage and resolution
pub mod engine;
pub mod storage;

// Serving
pub mod config;
#[cfg(feature = "server")]
pub mod observability;
#[cfg(feature = "transport-http")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use contact::{Contact, ContactFact, ContactId, LinkPrecedence, NewContact};
pub use engine::{EngineConfig, IdentityEngine, Resolution};
pub use error::{ExecutionError, IdentityError, IdentityResult, ValidationError};
pub use identity::{ConsolidatedIdentity, IdentifyResponse};
pub use storage::{ContactStore, InMemoryContactStore, StorageError};
