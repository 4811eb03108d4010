//! Device Registry integration coverage: type registration, entity
//! lookup/listing, and the serialize round-trip invariant, all driven
//! through the crate's public API against [`MemoryStore`].

use homehub::entities::{register_builtin_types, Entity, EntityType, Registry, TYPE_GENERIC_LIGHT, TYPE_GENERIC_POWER};
use homehub::persistence::memory_store::MemoryStore;

fn setup() -> MemoryStore {
    register_builtin_types();
    MemoryStore::new()
}

#[test]
fn registering_builtin_types_twice_does_not_duplicate() {
    register_builtin_types();
    register_builtin_types();
    let count = EntityType::all().iter().filter(|t| t.type_id == TYPE_GENERIC_LIGHT).count();
    assert_eq!(count, 1);
}

#[test]
fn list_orders_by_name_and_filters_by_type_and_pattern() {
    let store = setup();
    let registry = Registry::new(&store);

    let mut kitchen = Entity::new("e1".into(), EntityType::find(TYPE_GENERIC_LIGHT).unwrap());
    kitchen.name = "Kitchen Light".into();
    registry.save(&kitchen).unwrap();

    let mut hallway = Entity::new("e2".into(), EntityType::find(TYPE_GENERIC_LIGHT).unwrap());
    hallway.name = "Hallway Light".into();
    registry.save(&hallway).unwrap();

    let mut socket = Entity::new("e3".into(), EntityType::find(TYPE_GENERIC_POWER).unwrap());
    socket.name = "Garage Socket".into();
    registry.save(&socket).unwrap();

    let lights = registry.list(Some(TYPE_GENERIC_LIGHT), None).unwrap();
    assert_eq!(lights.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["Hallway Light", "Kitchen Light"]);

    let matching = registry.list(None, Some("%light%")).unwrap();
    assert_eq!(matching.len(), 2);

    let everything = registry.list(None, None).unwrap();
    assert_eq!(everything.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["Garage Socket", "Hallway Light", "Kitchen Light"]);
}

#[test]
fn serialize_round_trip_preserves_identity_and_state() {
    let store = setup();
    let registry = Registry::new(&store);
    let mut entity = Entity::new("ABCDE".into(), EntityType::find(TYPE_GENERIC_LIGHT).unwrap());
    entity.name = "Office Light".into();
    registry.set_state(&mut entity, homehub::entities::STATE_ON, Some("40".into()), true, 1234.0).unwrap();

    let reloaded = registry.find("ABCDE").unwrap().unwrap();
    assert_eq!(reloaded.unique_id, entity.unique_id);
    assert_eq!(reloaded.entity_type, entity.entity_type);
    assert_eq!(reloaded.name, entity.name);
    assert_eq!(reloaded.state_id, entity.state_id);
    assert_eq!(reloaded.state_value, entity.state_value);
    assert_eq!(reloaded.serialize(), entity.serialize());
}

#[test]
fn delete_removes_entity_from_the_registry() {
    let store = setup();
    let registry = Registry::new(&store);
    let entity = Entity::new("gone".into(), EntityType::find(TYPE_GENERIC_POWER).unwrap());
    registry.save(&entity).unwrap();
    assert!(registry.find("gone").unwrap().is_some());

    registry.delete("gone").unwrap();
    assert!(registry.find("gone").unwrap().is_none());
}
