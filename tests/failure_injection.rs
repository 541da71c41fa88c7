//! Store failures and how the engine surfaces and recovers from them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;

use idlink::time::ManualClock;
use idlink::{
    Contact, ContactFact, ContactId, ContactStore, ExecutionError, IdentityEngine, IdentityError,
    InMemoryContactStore, LinkPrecedence, NewContact, StorageError,
};

/// Wraps the in-memory store and fails selected calls.
#[derive(Debug)]
struct FlakyStore {
    inner: InMemoryContactStore,
    fail_reads: AtomicBool,
    fail_creates: AtomicBool,
    /// Number of `update_link` calls allowed before every further one fails.
    updates_allowed: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyStore {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: InMemoryContactStore::with_clock(clock),
            fail_reads: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            updates_allowed: AtomicUsize::new(usize::MAX),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn heal(&self) {
        self.fail_reads.store(false, Ordering::SeqCst);
        self.fail_creates.store(false, Ordering::SeqCst);
        self.updates_allowed.store(usize::MAX, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<(), StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("connection reset".to_string()));
        }
        Ok(())
    }
}

impl ContactStore for FlakyStore {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        self.read()?;
        self.inner.find_matching(email, phone_number)
    }

    fn find_by_ids(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        self.read()?;
        self.inner.find_by_ids(ids)
    }

    fn find_by_ids_or_linked(&self, ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        self.read()?;
        self.inner.find_by_ids_or_linked(ids)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        self.read()?;
        self.inner.get(id)
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError("disk full".to_string()));
        }
        self.inner.create(contact)
    }

    fn update_link(
        &self,
        id: ContactId,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let allowed = self
            .updates_allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if allowed.is_err() {
            return Err(StorageError::BackendError("write timed out".to_string()));
        }
        self.inner.update_link(id, link_precedence, linked_id)
    }

    fn resolution_lock(&self) -> Option<&Mutex<()>> {
        self.inner.resolution_lock()
    }
}

struct Harness {
    engine: IdentityEngine,
    store: Arc<FlakyStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(FlakyStore::new(clock.clone()));
        Self {
            engine: IdentityEngine::new(store.clone()),
            store,
            clock,
        }
    }

    fn seed(&self, contact: NewContact) -> Contact {
        let created = self.store.inner.create(contact).unwrap();
        self.clock.advance(Duration::seconds(1));
        created
    }
}

fn fact(email: Option<&str>, phone: Option<&str>) -> ContactFact {
    ContactFact::new(email.map(str::to_owned), phone.map(str::to_owned)).unwrap()
}

#[test]
fn test_invalid_input_never_reaches_the_store() {
    let h = Harness::new();
    let err = h.engine.identify(None, None).unwrap_err();
    assert!(err.is_invalid_input());
    assert!(!err.is_retryable());
    assert_eq!(h.store.calls(), 0);
}

#[test]
fn test_read_failure_is_store_unavailable_and_writes_nothing() {
    let h = Harness::new();
    h.store.fail_reads.store(true, Ordering::SeqCst);

    let err = h.engine.resolve(&fact(Some("e1@x.io"), None)).unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        IdentityError::Execution(ExecutionError::StoreUnavailable {
            source: StorageError::ConnectionError(_)
        })
    ));
    assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
    assert!(h.store.inner.is_empty().unwrap());
}

#[test]
fn test_create_failure_is_store_unavailable() {
    let h = Harness::new();
    h.store.fail_creates.store(true, Ordering::SeqCst);

    let err = h.engine.resolve(&fact(Some("e1@x.io"), None)).unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(h.store.inner.is_empty().unwrap());

    h.store.heal();
    let identity = h.engine.resolve(&fact(Some("e1@x.io"), None)).unwrap();
    assert_eq!(identity.emails, vec!["e1@x.io".to_string()]);
}

#[test]
fn test_failure_on_first_demotion_is_store_unavailable() {
    let h = Harness::new();
    let a = h.seed(NewContact::primary(&fact(Some("e1@x.io"), Some("p1"))));
    let b = h.seed(NewContact::primary(&fact(Some("e2@x.io"), Some("p2"))));
    h.store.updates_allowed.store(0, Ordering::SeqCst);

    let err = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap_err();
    assert!(err.is_store_unavailable());

    // Nothing moved.
    assert!(h.store.inner.get(a.id).unwrap().unwrap().is_primary());
    assert!(h.store.inner.get(b.id).unwrap().unwrap().is_primary());
}

#[test]
fn test_partial_demotion_is_inconsistent_then_self_heals() {
    let h = Harness::new();
    let a = h.seed(NewContact::primary(&fact(Some("e1@x.io"), Some("p1"))));
    let b = h.seed(NewContact::primary(&fact(Some("e2@x.io"), Some("p2"))));
    let b2 = h.seed(NewContact::secondary(&fact(Some("e2b@x.io"), Some("p2")), b.id));
    h.store.updates_allowed.store(1, Ordering::SeqCst);

    let err = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap_err();
    assert!(err.is_inconsistent_state());
    assert!(err.is_retryable());
    match err {
        IdentityError::Execution(ExecutionError::DemotionFailed {
            contact_id,
            primary_id,
            ..
        }) => {
            assert_eq!(contact_id, b2.id);
            assert_eq!(primary_id, a.id);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // b moved under a, b2 still hangs off b.
    assert_eq!(h.store.inner.get(b.id).unwrap().unwrap().linked_id, Some(a.id));
    assert_eq!(h.store.inner.get(b2.id).unwrap().unwrap().linked_id, Some(b.id));

    h.store.heal();
    let identity = h.engine.resolve(&fact(Some("e2b@x.io"), None)).unwrap();
    assert_eq!(identity.primary_contact_id, a.id);
    assert_eq!(identity.secondary_contact_ids, vec![b.id, b2.id]);
    assert_eq!(h.store.inner.get(b2.id).unwrap().unwrap().linked_id, Some(a.id));
}

#[test]
fn test_failed_call_leaves_no_cached_state() {
    let h = Harness::new();
    h.seed(NewContact::primary(&fact(Some("e1@x.io"), None)));

    h.store.fail_reads.store(true, Ordering::SeqCst);
    assert!(h.engine.resolve(&fact(Some("e1@x.io"), None)).is_err());
    h.store.heal();

    let identity = h.engine.resolve(&fact(Some("e1@x.io"), Some("p9"))).unwrap();
    assert_eq!(identity.phone_numbers, vec!["p9".to_string()]);
    assert_eq!(identity.secondary_contact_ids.len(), 1);
}
