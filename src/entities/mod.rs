//! Device Registry: entity types, commands, states, and the entity table
//! built on top of [`crate::persistence`].
//!
//! `EntityState`/`EntityCommand`/`EntityType` mirror the process-wide,
//! idempotently-registered registries from
//! `original_source/src/entities/__init__.py`, with the same
//! registration-not-replacement semantics (re-registering an existing
//! `type_id` is a no-op). Per spec.md §9's REDESIGN FLAGS ("dynamic
//! dispatch for device classes becomes a closed tagged variant"), the
//! original's class-per-type dispatch (`entity_type.entity_class`, a live
//! Python class) becomes [`EntityClass`], a closed enum whose
//! [`DeviceClass`] impl is chosen by static dispatch instead of runtime
//! class lookup.

pub mod light;
pub mod power;

use std::sync::{Mutex, OnceLock};

use crate::error::HubError;
use crate::persistence::{EntityRow, HistoryKind, HistoryRecord, Persistence};

pub const STATE_UNKNOWN: u16 = 1;
pub const STATE_ON: u16 = 2;
pub const STATE_OFF: u16 = 3;

pub const COMMAND_ON: u16 = 1;
pub const COMMAND_OFF: u16 = 2;
pub const COMMAND_SET_LEVEL: u16 = 100;

pub const TYPE_GENERIC_POWER: u16 = 100;
pub const TYPE_GENERIC_LIGHT: u16 = 101;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityState {
    pub id: u16,
    pub name: String,
}

impl EntityState {
    pub fn serialize(&self) -> String {
        format!("{};{}", self.id, self.name)
    }
}

fn state_registry() -> &'static Mutex<Vec<EntityState>> {
    static REGISTRY: OnceLock<Mutex<Vec<EntityState>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(vec![
            EntityState { id: STATE_UNKNOWN, name: "Unknown".into() },
            EntityState { id: STATE_ON, name: "On".into() },
            EntityState { id: STATE_OFF, name: "Off".into() },
        ])
    })
}

/// Looks up a registered state, falling back to `Unknown` — per spec.md
/// §4.3, an unresolvable `state_id` "stays Unknown" rather than erroring.
pub fn find_state(id: u16) -> EntityState {
    let registry = state_registry().lock().unwrap();
    registry
        .iter()
        .find(|s| s.id == id)
        .cloned()
        .unwrap_or_else(|| registry.iter().find(|s| s.id == STATE_UNKNOWN).cloned().unwrap())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterType {
    Range0To100,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Range0To100 => "range(0-100)",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityCommand {
    pub id: u16,
    pub name: String,
    pub parameter_type: Option<ParameterType>,
}

fn command_registry() -> &'static Mutex<Vec<EntityCommand>> {
    static REGISTRY: OnceLock<Mutex<Vec<EntityCommand>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

impl EntityCommand {
    /// Registers this command globally as a side effect of construction,
    /// same as the original's `EntityCommand.__init__` (first registration
    /// with a given id wins; later ones with the same id are no-ops) —
    /// `COMMAND_ON`/`COMMAND_OFF` are shared across device classes this way.
    pub fn new(id: u16, name: &str, parameter_type: Option<ParameterType>) -> Self {
        let command = EntityCommand { id, name: name.to_string(), parameter_type };
        let mut registry = command_registry().lock().unwrap();
        if !registry.iter().any(|c| c.id == id) {
            registry.push(command.clone());
        }
        command
    }

    /// Returns the globally registered command with `id`, independent of
    /// any device type's own command list — mirrors
    /// `original_source/src/modules/client.py`'s `EntityCommand.find`.
    pub fn find(id: u16) -> Option<EntityCommand> {
        command_registry().lock().unwrap().iter().find(|c| c.id == id).cloned()
    }

    /// `"{id};{name};"` plus the parameter type if any — the trailing `;`
    /// is always present, preserved bit-for-bit from the original (spec.md
    /// §9 "wire-format oddities").
    pub fn serialize(&self) -> String {
        let mut out = format!("{};{};", self.id, self.name);
        if let Some(p) = self.parameter_type {
            out.push_str(p.as_str());
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommType {
    Radio,
}

/// The closed set of device-class behaviors (spec.md §9 REDESIGN FLAGS).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityClass {
    GenericPower,
    GenericLight,
}

impl EntityClass {
    pub fn handler(&self) -> &'static dyn DeviceClass {
        match self {
            EntityClass::GenericPower => &power::GenericPower,
            EntityClass::GenericLight => &light::GenericLight,
        }
    }
}

/// Per-type state/command codec. Implemented by zero-sized marker types
/// (`power::GenericPower`, `light::GenericLight`) selected through
/// [`EntityClass`] rather than a vtable populated at import time.
pub trait DeviceClass: Send + Sync {
    /// Decodes a radio state payload; returns the new `(state, value)` only
    /// if it differs from the entity's current state (`None` means "no
    /// change, don't log").
    fn on_state_frame(&self, current_state: u16, current_value: Option<&str>, payload: &[u8]) -> Option<(u16, Option<String>)>;
    /// Encodes a UI command into the (up to 5-byte) radio payload.
    fn encode_command(&self, cmd_id: u16, value: Option<&str>) -> Result<Vec<u8>, HubError>;
    /// Human-readable state description, e.g. `"Off"`, `"On (57%)"`.
    fn describe_state(&self, state_name: &str, value: Option<&str>) -> String;
    /// Human-readable description of a UI command for the history log, e.g.
    /// `"Turning the light on"`, `"Setting light level to 40"`.
    fn describe_command(&self, cmd_name: &str, cmd_id: u16, value: Option<&str>) -> String;
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityType {
    pub type_id: u16,
    pub type_name: String,
    pub entity_class: EntityClass,
    pub commands: Vec<EntityCommand>,
    pub color: Option<String>,
    pub image: Option<String>,
    pub comm_type: CommType,
}

impl EntityType {
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{};{};{};{};[",
            self.type_id,
            self.type_name,
            self.color.as_deref().unwrap_or(""),
            self.image.as_deref().unwrap_or(""),
        );
        let serialized: Vec<String> = self.commands.iter().map(|c| c.serialize()).collect();
        out.push_str(&serialized.join(","));
        out.push(']');
        out
    }
}

fn type_registry() -> &'static Mutex<Vec<EntityType>> {
    static REGISTRY: OnceLock<Mutex<Vec<EntityType>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

impl EntityType {
    /// Idempotent: a repeated registration with the same `type_id` is a
    /// no-op, matching `EntityType.register` in the original.
    pub fn register(type_id: u16, type_name: &str, entity_class: EntityClass, commands: Vec<EntityCommand>, color: Option<&str>, image: Option<&str>) {
        let mut registry = type_registry().lock().unwrap();
        if registry.iter().any(|t| t.type_id == type_id) {
            return;
        }
        log::info!("registering entity type: {}", type_name);
        registry.push(EntityType {
            type_id,
            type_name: type_name.to_string(),
            entity_class,
            commands,
            color: color.map(|s| s.to_string()),
            image: image.map(|s| s.to_string()),
            comm_type: CommType::Radio,
        });
    }

    pub fn find(type_id: u16) -> Option<EntityType> {
        type_registry().lock().unwrap().iter().find(|t| t.type_id == type_id).cloned()
    }

    pub fn all() -> Vec<EntityType> {
        type_registry().lock().unwrap().clone()
    }
}

/// Registers the two built-in device classes. Idempotent; safe to call
/// more than once (e.g. once per test).
pub fn register_builtin_types() {
    power::register();
    light::register();
}

/// In-memory view of a persisted device row, with its resolved type.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub unique_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub state_id: u16,
    pub state_value: Option<String>,
    pub last_checkin: f64,
}

impl Entity {
    pub fn new(unique_id: String, entity_type: EntityType) -> Self {
        Entity {
            unique_id,
            entity_type,
            name: "Unnamed entity".to_string(),
            state_id: STATE_UNKNOWN,
            state_value: None,
            last_checkin: 0.0,
        }
    }

    pub fn describe_state(&self) -> String {
        let state = find_state(self.state_id);
        self.entity_type.entity_class.handler().describe_state(&state.name, self.state_value.as_deref())
    }

    /// `"{unique_id};{type_id};{name};{state};{value?};{last_checkin}"` —
    /// the trailing `;` before an absent `state_value` is never suppressed
    /// (spec.md §9 wire-format oddities).
    pub fn serialize(&self) -> String {
        format!(
            "{};{};{};{};{};{}",
            self.unique_id,
            self.entity_type.type_id,
            self.name,
            find_state(self.state_id).serialize(),
            self.state_value.as_deref().unwrap_or(""),
            self.last_checkin,
        )
    }

    fn to_row(&self) -> EntityRow {
        EntityRow {
            unique_id: self.unique_id.clone(),
            type_id: self.entity_type.type_id,
            name: self.name.clone(),
            state_id: self.state_id,
            state_value: self.state_value.clone(),
            last_checkin: self.last_checkin,
        }
    }

    fn from_row(row: EntityRow) -> Option<Entity> {
        let entity_type = EntityType::find(row.type_id)?;
        Some(Entity {
            unique_id: row.unique_id,
            entity_type,
            name: row.name,
            state_id: row.state_id,
            state_value: row.state_value,
            last_checkin: row.last_checkin,
        })
    }
}

/// Facade over [`Persistence`] implementing the §4.3 registry operations.
pub struct Registry<'p, P: Persistence> {
    store: &'p P,
}

impl<'p, P: Persistence> Registry<'p, P> {
    pub fn new(store: &'p P) -> Self {
        Registry { store }
    }

    pub fn find(&self, unique_id: &str) -> Result<Option<Entity>, HubError> {
        Ok(self.store.find_entity(unique_id)?.and_then(Entity::from_row))
    }

    /// Unresolvable `type_id` rows are skipped, not surfaced as rows
    /// (spec.md §3 Entity invariant: "the row is inert").
    pub fn list(&self, type_id: Option<u16>, name_pattern: Option<&str>) -> Result<Vec<Entity>, HubError> {
        Ok(self
            .store
            .list_entities(type_id, name_pattern)?
            .into_iter()
            .filter_map(Entity::from_row)
            .collect())
    }

    pub fn save(&self, entity: &Entity) -> Result<(), HubError> {
        self.store.save_entity(entity.to_row())
    }

    pub fn delete(&self, unique_id: &str) -> Result<(), HubError> {
        self.store.delete_entity(unique_id)
    }

    /// Writes the new state/value and appends a `State` history row, both
    /// atomically, when the new `(state, value)` differs from the current
    /// one.
    pub fn set_state(&self, entity: &mut Entity, state_id: u16, value: Option<String>, touch_checkin: bool, now: f64) -> Result<(), HubError> {
        entity.state_id = state_id;
        entity.state_value = value;
        if touch_checkin {
            entity.last_checkin = now;
        }
        let action = format!("State changed to {}", entity.describe_state());
        self.store.set_entity_state(
            entity.to_row(),
            HistoryRecord {
                timestamp: now,
                entity_id: entity.unique_id.clone(),
                entity_name: entity.name.clone(),
                action,
                kind: HistoryKind::State,
            },
        )
    }

    pub fn log_command(&self, entity: &Entity, action: &str, now: f64) -> Result<(), HubError> {
        self.store.append_history(HistoryRecord {
            timestamp: now,
            entity_id: entity.unique_id.clone(),
            entity_name: entity.name.clone(),
            action: action.to_string(),
            kind: HistoryKind::Command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store::MemoryStore;

    fn setup() -> MemoryStore {
        register_builtin_types();
        MemoryStore::new()
    }

    #[test]
    fn entity_type_registration_is_idempotent() {
        register_builtin_types();
        register_builtin_types();
        assert_eq!(EntityType::all().iter().filter(|t| t.type_id == TYPE_GENERIC_POWER).count(), 1);
    }

    #[test]
    fn entity_serialize_keeps_trailing_separators() {
        let entity = Entity::new("ABCDE".into(), EntityType::find(TYPE_GENERIC_LIGHT).unwrap_or_else(|| {
            register_builtin_types();
            EntityType::find(TYPE_GENERIC_LIGHT).unwrap()
        }));
        assert_eq!(entity.serialize(), "ABCDE;101;Unnamed entity;1;Unknown;;0");
    }

    #[test]
    fn unknown_type_id_is_skipped_on_load() {
        let store = setup();
        store
            .save_entity(EntityRow {
                unique_id: "z".into(),
                type_id: 9999,
                name: "Ghost".into(),
                state_id: STATE_UNKNOWN,
                state_value: None,
                last_checkin: 0.0,
            })
            .unwrap();
        let registry = Registry::new(&store);
        assert_eq!(registry.find("z").unwrap(), None);
    }

    #[test]
    fn set_state_appends_history_when_value_changes() {
        let store = setup();
        let registry = Registry::new(&store);
        let mut entity = Entity::new("abc".into(), EntityType::find(TYPE_GENERIC_POWER).unwrap());
        registry.set_state(&mut entity, STATE_ON, Some("1".into()), true, 100.0).unwrap();
        assert_eq!(store.count_history(&Default::default()).unwrap(), 1);
    }
}
