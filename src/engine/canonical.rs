//! Canonical primary selection.

use crate::contact::Contact;
use crate::error::{IdentityError, IdentityResult};

/// The component's true primary: the oldest member still marked primary.
///
/// Age is `created_at`, then `id`. Secondaries never win, however old they
/// are; a component with no primary at all cannot be repaired by demotion
/// alone and is reported as inconsistent.
pub(crate) fn select_primary(component: &[Contact]) -> IdentityResult<&Contact> {
    component
        .iter()
        .filter(|c| c.is_primary())
        .min_by(|a, b| a.age_cmp(b))
        .ok_or_else(|| {
            IdentityError::inconsistent(format!(
                "component of {} contacts has no primary",
                component.len()
            ))
        })
}

/// Members that must be re-linked under `primary`.
///
/// Every other primary is demoted, and every secondary whose link target is
/// not `primary` is re-pointed, so no chains survive the merge. Order
/// follows `component`.
pub(crate) fn misattached<'a>(
    component: &'a [Contact],
    primary: &'a Contact,
) -> impl Iterator<Item = &'a Contact> + 'a {
    component
        .iter()
        .filter(move |c| c.id != primary.id)
        .filter(move |c| c.is_primary() || c.linked_id != Some(primary.id))
}
