//! Consolidation engine.
//!
//! This module provides a synchronous resolver that consolidates contact
//! records held in a pluggable [`ContactStore`]. Nothing about the graph is
//! cached between calls: each resolution rediscovers the component, re-derives
//! its primary, and repairs whatever it finds. A call that failed half way is
//! therefore healed by the next call touching the same component.
//!
//! One resolution is a bounded loop of passes:
//!
//! ```text
//! seed lookup ─┬─ no match ──────────────────────────────► create primary ─► done
//!              └─ closure ─► load component ─► select primary ─► re-link
//!                    ─┬─ fact already known ─► read group ─► assemble ─► done
//!                     └─ new fact ─► create secondary ─► next pass
//! ```

mod canonical;
mod traversal;
mod write_path;

use std::sync::{Arc, PoisonError};

use tracing::{debug, info_span, warn};

use crate::contact::{ContactFact, ContactId};
use crate::error::{ExecutionError, IdentityResult, ValidationError};
use crate::identity::ConsolidatedIdentity;
use crate::storage::ContactStore;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum passes per resolution before giving up.
    ///
    /// A new fact normally needs two passes: one that inserts it and one
    /// that reads the result back. Concurrent writers can force more.
    pub max_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_passes: 5 }
    }
}

impl EngineConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidConfig` if `max_passes` is zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_passes == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_passes must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

/// Outcome of a resolution, with the writes it performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The consolidated identity.
    pub identity: ConsolidatedIdentity,
    /// Records created during this call, in creation order.
    pub created: Vec<ContactId>,
    /// Records re-linked under the primary during this call.
    pub relinked: Vec<ContactId>,
    /// Passes taken.
    pub passes: usize,
}

enum PassOutcome {
    Resolved(ConsolidatedIdentity),
    Extended,
}

/// Identity consolidation engine.
#[derive(Clone)]
pub struct IdentityEngine {
    store: Arc<dyn ContactStore>,
    config: EngineConfig,
}

impl IdentityEngine {
    /// Create a new engine over `store` with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
        }
    }

    /// Create a new engine with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is invalid.
    pub fn with_config(store: Arc<dyn ContactStore>, config: EngineConfig) -> IdentityResult<Self> {
        Ok(Self {
            store,
            config: config.validate()?,
        })
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates raw request fields and resolves them.
    ///
    /// # Errors
    ///
    /// - `Validation` if neither field is a non-empty string (no store access happens)
    /// - otherwise as [`IdentityEngine::resolve`]
    pub fn identify(
        &self,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> IdentityResult<ConsolidatedIdentity> {
        let fact = ContactFact::new(email, phone_number)?;
        self.resolve(&fact)
    }

    /// Resolves `fact` to its consolidated identity.
    ///
    /// # Errors
    ///
    /// - `Execution(StoreUnavailable)` if any store call fails before a partial merge
    /// - `Execution(DemotionFailed)` if a re-link batch fails after partial progress
    /// - `Execution(PassLimitExceeded)` if the graph keeps changing under the loop
    /// - `Execution(InconsistentGraph)` if the component has no primary
    pub fn resolve(&self, fact: &ContactFact) -> IdentityResult<ConsolidatedIdentity> {
        self.resolve_detailed(fact).map(|r| r.identity)
    }

    /// Like [`IdentityEngine::resolve`] but also reports the writes performed.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityEngine::resolve`].
    pub fn resolve_detailed(&self, fact: &ContactFact) -> IdentityResult<Resolution> {
        let span = info_span!(
            "resolve",
            email_given = fact.email().is_some(),
            phone_given = fact.phone_number().is_some(),
        );
        let _enter = span.enter();

        // The lock guards no data, so a poisoned one is still usable.
        let _serialized = self
            .store
            .resolution_lock()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let store = self.store.as_ref();
        let mut created = Vec::new();
        let mut relinked = Vec::new();

        for pass in 1..=self.config.max_passes {
            match run_pass(store, fact, &mut created, &mut relinked)? {
                PassOutcome::Resolved(identity) => {
                    debug!(
                        pass,
                        primary_id = %identity.primary_contact_id,
                        secondaries = identity.secondary_contact_ids.len(),
                        "resolved"
                    );
                    return Ok(Resolution {
                        identity,
                        created,
                        relinked,
                        passes: pass,
                    });
                }
                PassOutcome::Extended => {
                    debug!(pass, "new fact recorded; re-resolving");
                }
            }
        }

        warn!(
            passes = self.config.max_passes,
            created = created.len(),
            "resolution did not converge"
        );
        Err(ExecutionError::PassLimitExceeded {
            passes: self.config.max_passes,
        }
        .into())
    }
}

fn run_pass(
    store: &dyn ContactStore,
    fact: &ContactFact,
    created: &mut Vec<ContactId>,
    relinked: &mut Vec<ContactId>,
) -> IdentityResult<PassOutcome> {
    let seeds = store.find_matching(fact.email(), fact.phone_number())?;
    if seeds.is_empty() {
        let contact = write_path::insert_primary(store, fact)?;
        created.push(contact.id);
        return Ok(PassOutcome::Resolved(ConsolidatedIdentity::singleton(&contact)));
    }

    let ids = traversal::closure(store, &seeds)?;
    let component = store.find_by_ids(&ids)?;
    let primary = canonical::select_primary(&component)?;
    debug!(
        seeds = seeds.len(),
        component = component.len(),
        primary_id = %primary.id,
        "component loaded"
    );

    relinked.extend(write_path::relink_component(store, &component, primary)?);

    // Checked against the snapshot taken before re-linking. Re-linking only
    // touches link fields, so both views agree on which facts are present.
    if !fact.is_known_to(&component) {
        let contact = write_path::insert_secondary(store, fact, primary.id)?;
        created.push(contact.id);
        return Ok(PassOutcome::Extended);
    }

    let group = store.find_by_ids_or_linked(&[primary.id])?;
    Ok(PassOutcome::Resolved(ConsolidatedIdentity::assemble(primary, &group)))
}
