//! Persistence contract coverage: writer-scope atomicity (invariant 7 / S6)
//! and the user/settings tables, exercised directly against
//! [`MemoryStore`] without going through the higher-level registry/auth
//! facades.

use homehub::error::HubError;
use homehub::persistence::memory_store::MemoryStore;
use homehub::persistence::{EntityRow, HistoryFilter, Persistence};

fn sample_row(id: &str) -> EntityRow {
    EntityRow {
        unique_id: id.to_string(),
        type_id: 100,
        name: "Test".to_string(),
        state_id: 1,
        state_value: None,
        last_checkin: 0.0,
    }
}

// The writer-scope snapshot/restore mechanics (a rollback discards every
// mutation made inside the closure, a normal return commits them all) need
// access to the `Tables` transaction handle's fields, which are private to
// `memory_store` by design; that part of invariant 7 / S6 is covered by
// `writer_rolls_back_on_error`/`writer_commits_on_success` in
// `src/persistence/memory_store.rs`. This file checks the contract visible
// from outside the crate: a writer scope that raises an error leaves the
// store exactly as usable as before, with no side effects.

#[test]
fn a_failing_writer_scope_leaves_the_store_usable_and_unaffected() {
    let store = MemoryStore::new();
    store.save_entity(sample_row("keeper")).unwrap();

    let result: Result<(), HubError> = store.writer(|_tx| Err(HubError::Persistence("deliberate rollback".into())));

    assert!(result.is_err());
    assert!(store.find_entity("keeper").unwrap().is_some());
    assert_eq!(store.count_history(&HistoryFilter::default()).unwrap(), 0);

    // The store is still writable after an aborted scope.
    store.save_entity(sample_row("after")).unwrap();
    assert!(store.find_entity("after").unwrap().is_some());
}

#[test]
fn settings_round_trip_with_fallback_default() {
    let store = MemoryStore::new();
    assert_eq!(store.get_setting("missing").unwrap(), None);
    store.set_setting("lang", "en").unwrap();
    assert_eq!(store.get_setting("lang").unwrap(), Some("en".to_string()));
}

#[test]
fn user_crud_round_trips_through_insert_update_delete() {
    let store = MemoryStore::new();
    let uid = store.insert_user("alice", "hash1", false).unwrap();

    let found = store.find_user_by_id(uid).unwrap().unwrap();
    assert_eq!(found.username, "alice");
    assert!(!found.is_admin);

    store.update_user(uid, Some("alice2"), Some("hash2"), Some(true)).unwrap();
    let updated = store.find_user_by_name("alice2").unwrap().unwrap();
    assert_eq!(updated.password_hash, "hash2");
    assert!(updated.is_admin);

    store.delete_user(uid).unwrap();
    assert!(store.find_user_by_id(uid).unwrap().is_none());
}

#[test]
fn list_entities_filters_by_type_and_sql_like_pattern() {
    let store = MemoryStore::new();
    let mut kitchen = sample_row("a");
    kitchen.name = "Kitchen Light".into();
    kitchen.type_id = 101;
    let mut garage = sample_row("b");
    garage.name = "Garage Power".into();
    garage.type_id = 100;
    store.save_entity(kitchen).unwrap();
    store.save_entity(garage).unwrap();

    assert_eq!(store.list_entities(Some(101), None).unwrap().len(), 1);
    assert_eq!(store.list_entities(None, Some("%light%")).unwrap().len(), 1);
    assert_eq!(store.list_entities(None, Some("kitchen_light")).unwrap().len(), 1);
    assert_eq!(store.list_entities(None, None).unwrap().len(), 2);
}
