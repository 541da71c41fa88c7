//! Breadth-first closure over the link graph.

use std::collections::BTreeSet;
use std::iter;

use tracing::trace;

use crate::contact::{Contact, ContactId};
use crate::storage::{ContactStore, StorageError};

/// Ids of every record transitively connected to `seeds` through `linked_id`.
///
/// The first frontier is the seeds' ids plus their link targets. Each round
/// fetches every record whose id or link target is in the frontier and feeds
/// the unseen ids (own and link target) into the next one. Ids that point at
/// records missing from the store are kept; loading the component simply
/// skips them.
pub(crate) fn closure(
    store: &dyn ContactStore,
    seeds: &[Contact],
) -> Result<Vec<ContactId>, StorageError> {
    let mut visited = BTreeSet::new();
    let mut frontier: BTreeSet<ContactId> = seeds.iter().flat_map(endpoints).collect();
    let mut rounds = 0usize;

    while !frontier.is_empty() {
        rounds += 1;
        visited.extend(frontier.iter().copied());

        let batch: Vec<ContactId> = frontier.into_iter().collect();
        let found = store.find_by_ids_or_linked(&batch)?;

        frontier = found
            .iter()
            .flat_map(endpoints)
            .filter(|id| !visited.contains(id))
            .collect();
    }

    trace!(rounds, component = visited.len(), "closure complete");
    Ok(visited.into_iter().collect())
}

fn endpoints(contact: &Contact) -> impl Iterator<Item = ContactId> {
    iter::once(contact.id).chain(contact.linked_id)
}
