//! Mutations issued by a resolution pass.

use tracing::{info, warn};

use crate::contact::{Contact, ContactFact, ContactId, LinkPrecedence, NewContact};
use crate::error::{ExecutionError, IdentityResult};
use crate::storage::ContactStore;

use super::canonical::misattached;

/// Re-links every misattached member of `component` directly under `primary`.
///
/// Each update is its own store operation; there is no rollback. A failure
/// before anything was written is reported as the store being unavailable.
/// A failure after at least one write leaves the component half-merged and
/// is reported as `DemotionFailed`; the next resolution recomputes the
/// primary from scratch and finishes the job.
pub(crate) fn relink_component(
    store: &dyn ContactStore,
    component: &[Contact],
    primary: &Contact,
) -> IdentityResult<Vec<ContactId>> {
    let mut relinked = Vec::new();

    for member in misattached(component, primary) {
        match store.update_link(member.id, LinkPrecedence::Secondary, Some(primary.id)) {
            Ok(()) => {
                if member.is_primary() {
                    info!(contact_id = %member.id, primary_id = %primary.id, "demoted primary");
                } else {
                    info!(contact_id = %member.id, primary_id = %primary.id, "re-pointed secondary");
                }
                relinked.push(member.id);
            }
            Err(err) if relinked.is_empty() => return Err(err.into()),
            Err(err) => {
                warn!(
                    contact_id = %member.id,
                    primary_id = %primary.id,
                    completed = relinked.len(),
                    error = %err,
                    "re-link batch failed part way"
                );
                return Err(ExecutionError::DemotionFailed {
                    contact_id: member.id,
                    primary_id: primary.id,
                    reason: err.to_string(),
                }
                .into());
            }
        }
    }

    Ok(relinked)
}

/// Creates a fresh primary for a fact nobody has seen.
pub(crate) fn insert_primary(store: &dyn ContactStore, fact: &ContactFact) -> IdentityResult<Contact> {
    let created = store.create(NewContact::primary(fact))?;
    info!(contact_id = %created.id, "created primary contact");
    Ok(created)
}

/// Records a new fact combination as a secondary of `primary`.
pub(crate) fn insert_secondary(
    store: &dyn ContactStore,
    fact: &ContactFact,
    primary: ContactId,
) -> IdentityResult<Contact> {
    let created = store.create(NewContact::secondary(fact, primary))?;
    info!(contact_id = %created.id, primary_id = %primary, "created secondary contact");
    Ok(created)
}
