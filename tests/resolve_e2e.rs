//! End-to-end resolution behaviour against the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use idlink::time::ManualClock;
use idlink::{
    Contact, ContactFact, ContactId, ContactStore, IdentityEngine, InMemoryContactStore,
    LinkPrecedence, NewContact,
};

struct Harness {
    engine: IdentityEngine,
    store: Arc<InMemoryContactStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(InMemoryContactStore::with_clock(clock.clone()));
        Self {
            engine: IdentityEngine::new(store.clone()),
            store,
            clock,
        }
    }

    fn tick(&self) {
        self.clock.advance(Duration::seconds(1));
    }

    fn primary(&self, email: Option<&str>, phone: Option<&str>) -> Contact {
        let contact = self
            .store
            .create(NewContact::primary(&fact(email, phone)))
            .unwrap();
        self.tick();
        contact
    }

    fn secondary(&self, email: Option<&str>, phone: Option<&str>, of: ContactId) -> Contact {
        let contact = self
            .store
            .create(NewContact::secondary(&fact(email, phone), of))
            .unwrap();
        self.tick();
        contact
    }
}

fn fact(email: Option<&str>, phone: Option<&str>) -> ContactFact {
    ContactFact::new(email.map(str::to_owned), phone.map(str::to_owned)).unwrap()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn test_new_identity_creates_one_primary() {
    let h = Harness::new();
    let identity = h.engine.resolve(&fact(Some("e1@x.io"), Some("p1"))).unwrap();

    let stored = h.store.snapshot().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_primary());
    assert_eq!(stored[0].linked_id, None);

    assert_eq!(identity.primary_contact_id, stored[0].id);
    assert_eq!(identity.emails, strings(&["e1@x.io"]));
    assert_eq!(identity.phone_numbers, strings(&["p1"]));
    assert!(identity.secondary_contact_ids.is_empty());
}

#[test]
fn test_resolving_known_facts_is_idempotent() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    h.secondary(Some("e2@x.io"), Some("p1"), a.id);

    let before = h.store.snapshot().unwrap();
    let first = h.engine.resolve(&fact(Some("e2@x.io"), Some("p1"))).unwrap();
    h.tick();
    let second = h.engine.resolve(&fact(Some("e2@x.io"), Some("p1"))).unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.snapshot().unwrap(), before);
}

#[test]
fn test_transitive_closure_reaches_primary_through_secondary() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    let b = h.secondary(Some("e2@x.io"), Some("p1"), a.id);

    let identity = h.engine.resolve(&fact(Some("e2@x.io"), None)).unwrap();
    assert_eq!(identity.primary_contact_id, a.id);
    assert_eq!(identity.emails, strings(&["e1@x.io", "e2@x.io"]));
    assert_eq!(identity.phone_numbers, strings(&["p1"]));
    assert_eq!(identity.secondary_contact_ids, vec![b.id]);
}

#[test]
fn test_closure_spans_several_hops() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    let b = h.secondary(Some("e2@x.io"), Some("p1"), a.id);
    let c = h.secondary(Some("e2@x.io"), Some("p3"), a.id);

    // p3 only touches c; c reaches a, a reaches b.
    let identity = h.engine.resolve(&fact(None, Some("p3"))).unwrap();
    assert_eq!(identity.primary_contact_id, a.id);
    assert_eq!(identity.secondary_contact_ids, vec![b.id, c.id]);
    assert_eq!(identity.phone_numbers, strings(&["p1", "p3"]));
}

#[test]
fn test_merge_demotes_newer_primary() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    let b = h.primary(Some("e2@x.io"), Some("p2"));

    let identity = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap();
    assert_eq!(identity.primary_contact_id, a.id);
    assert_eq!(identity.emails, strings(&["e1@x.io", "e2@x.io"]));
    assert_eq!(identity.phone_numbers, strings(&["p1", "p2"]));
    assert_eq!(identity.secondary_contact_ids, vec![b.id]);

    let b_now = h.store.get(b.id).unwrap().unwrap();
    assert_eq!(b_now.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(b_now.linked_id, Some(a.id));
    assert!(b_now.updated_at > b.updated_at);

    // Both facts were already on record; nothing new is inserted.
    assert_eq!(h.store.len().unwrap(), 2);
}

#[test]
fn test_merge_then_lookup_from_either_side_agrees() {
    let h = Harness::new();
    h.primary(Some("e1@x.io"), None);
    h.primary(Some("e2@x.io"), Some("p2"));
    let merged = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap();

    let via_e1 = h.engine.resolve(&fact(Some("e1@x.io"), None)).unwrap();
    let via_e2 = h.engine.resolve(&fact(Some("e2@x.io"), None)).unwrap();
    assert_eq!(via_e1, merged);
    assert_eq!(via_e2, merged);
}

#[test]
fn test_new_fact_is_inserted_as_secondary() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));

    let identity = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap();
    assert_eq!(identity.primary_contact_id, a.id);
    assert_eq!(identity.phone_numbers, strings(&["p1", "p2"]));
    assert_eq!(identity.secondary_contact_ids.len(), 1);

    let c = h.store.get(identity.secondary_contact_ids[0]).unwrap().unwrap();
    assert_eq!(c.email.as_deref(), Some("e1@x.io"));
    assert_eq!(c.phone_number.as_deref(), Some("p2"));
    assert_eq!(c.linked_id, Some(a.id));
    assert_eq!(c.link_precedence, LinkPrecedence::Secondary);
}

#[test]
fn test_subset_of_known_facts_inserts_nothing() {
    let h = Harness::new();
    h.primary(Some("e1@x.io"), Some("p1"));

    h.engine.resolve(&fact(None, Some("p1"))).unwrap();
    h.engine.resolve(&fact(Some("e1@x.io"), None)).unwrap();
    assert_eq!(h.store.len().unwrap(), 1);
}

#[test]
fn test_tie_break_prefers_lower_id() {
    let h = Harness::new();
    let at = DateTime::<Utc>::UNIX_EPOCH;
    let raw = |id: u64, email: &str, phone: &str| Contact {
        id: ContactId::new(id),
        email: Some(email.to_string()),
        phone_number: Some(phone.to_string()),
        linked_id: None,
        link_precedence: LinkPrecedence::Primary,
        created_at: at,
        updated_at: at,
    };
    // Inserted in reverse id order so insertion order cannot decide.
    h.store.insert_raw(raw(7, "e7@x.io", "p7")).unwrap();
    h.store.insert_raw(raw(3, "e3@x.io", "p3")).unwrap();

    let identity = h.engine.resolve(&fact(Some("e7@x.io"), Some("p3"))).unwrap();
    assert_eq!(identity.primary_contact_id, ContactId::new(3));
    assert_eq!(identity.secondary_contact_ids, vec![ContactId::new(7)]);
    assert_eq!(identity.emails, strings(&["e3@x.io", "e7@x.io"]));

    let seven = h.store.get(ContactId::new(7)).unwrap().unwrap();
    assert_eq!(seven.linked_id, Some(ContactId::new(3)));
}

#[test]
fn test_tie_break_with_shared_clock_timestamps() {
    // The clock never advances, so every record shares one timestamp.
    let clock = Arc::new(ManualClock::at_epoch());
    let store = Arc::new(InMemoryContactStore::with_clock(clock));
    let engine = IdentityEngine::new(store.clone());

    let first = engine.resolve(&fact(Some("e1@x.io"), None)).unwrap();
    let second = engine.resolve(&fact(None, Some("p2"))).unwrap();
    let merged = engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap();

    assert_eq!(merged.primary_contact_id, first.primary_contact_id);
    assert_eq!(merged.secondary_contact_ids, vec![second.primary_contact_id]);
}

#[test]
fn test_lookup_through_secondary_never_touches_it() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    let b = h.secondary(Some("e2@x.io"), Some("p1"), a.id);

    h.engine.resolve(&fact(Some("e2@x.io"), None)).unwrap();

    let b_now = h.store.get(b.id).unwrap().unwrap();
    assert_eq!(b_now, b);
    assert_eq!(h.store.get(a.id).unwrap().unwrap(), a);
}

#[test]
fn test_three_way_merge_keeps_oldest_and_flattens() {
    let h = Harness::new();
    let a = h.primary(Some("e1@x.io"), Some("p1"));
    let b = h.primary(Some("e2@x.io"), Some("p2"));
    let b2 = h.secondary(Some("e2b@x.io"), Some("p2"), b.id);
    let c = h.primary(Some("e3@x.io"), Some("p3"));

    h.engine.resolve(&fact(Some("e2@x.io"), Some("p3"))).unwrap();
    let identity = h.engine.resolve(&fact(Some("e1@x.io"), Some("p2"))).unwrap();

    assert_eq!(identity.primary_contact_id, a.id);
    let mut secondaries = identity.secondary_contact_ids.clone();
    secondaries.sort();
    assert_eq!(secondaries, vec![b.id, b2.id, c.id]);

    for contact in h.store.snapshot().unwrap() {
        if contact.id == a.id {
            assert!(contact.is_primary());
        } else {
            assert_eq!(contact.linked_id, Some(a.id), "contact {}", contact.id);
        }
    }
}

#[test]
fn test_empty_strings_count_as_absent() {
    let h = Harness::new();
    let identity = h
        .engine
        .identify(Some(String::new()), Some("p1".to_string()))
        .unwrap();
    assert!(identity.emails.is_empty());
    assert_eq!(identity.phone_numbers, strings(&["p1"]));

    let err = h
        .engine
        .identify(Some(String::new()), Some(String::new()))
        .unwrap_err();
    assert!(err.is_invalid_input());
    assert_eq!(h.store.len().unwrap(), 1);
}

#[test]
fn test_concurrent_resolutions_converge_on_one_primary() {
    let h = Harness::new();
    let engine = Arc::new(h.engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let email = format!("e{}@x.io", i % 2);
                engine
                    .resolve(&fact(Some(&email), Some("shared")))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let primaries: Vec<_> = h
        .store
        .snapshot()
        .unwrap()
        .into_iter()
        .filter(Contact::is_primary)
        .collect();
    assert_eq!(primaries.len(), 1);
}
