//! Storage backends for idlink.
//!
//! [`ContactStore`] is the only seam the engine talks to. The in-memory
//! backend is always available; the durable backend lives behind the
//! `persistent` feature.

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use index::ContactIndex;
pub use memory::InMemoryContactStore;
pub use traits::{ContactStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentContactStore};
