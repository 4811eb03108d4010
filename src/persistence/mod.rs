//! Persistence: the single-writer, reentrant-transaction store.
//!
//! spec.md treats the store as an opaque external collaborator (§1, §6) —
//! only the operations below, and the writer-scope semantics from
//! `original_source/src/util/database.py`'s `Database.writer()` (commit on
//! normal exit, rollback on the sentinel), are part of the contract. This
//! module defines that contract as a trait; [`memory_store`] is the in-tree
//! reference implementation the rest of the hub runs against, not a
//! database engine (see DESIGN.md for why no SQL crate is pulled in here).

pub mod memory_store;

use crate::error::HubError;

#[derive(Clone, Debug, PartialEq)]
pub struct EntityRow {
    pub unique_id: String,
    pub type_id: u16,
    pub name: String,
    pub state_id: u16,
    pub state_value: Option<String>,
    pub last_checkin: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    State,
    Command,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::State => "state",
            HistoryKind::Command => "command",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: f64,
    pub entity_id: String,
    pub entity_name: String,
    pub action: String,
    pub kind: HistoryKind,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryFilter {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub entity_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserRow {
    pub uid: u64,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// Single-writer store with a reentrant writer scope.
///
/// `writer` maps directly onto `Database.writer()`: the closure receives a
/// mutable handle to the transaction, its return value is committed if
/// `Ok`, and any `Err` (the "rollback sentinel" is simply the caller
/// returning `Err` deliberately) discards every mutation made inside the
/// closure. Nesting is expressed by passing the same `&mut Self::Tx` handle
/// into helper functions rather than re-entering `writer` on the same
/// thread — a plain `Mutex` isn't reentrant, so re-locking would deadlock.
pub trait Persistence: Send + Sync {
    type Tx;

    fn writer<T>(&self, f: impl FnOnce(&mut Self::Tx) -> Result<T, HubError>) -> Result<T, HubError>;

    fn find_entity(&self, unique_id: &str) -> Result<Option<EntityRow>, HubError>;
    fn list_entities(&self, type_id: Option<u16>, name_pattern: Option<&str>) -> Result<Vec<EntityRow>, HubError>;
    fn save_entity(&self, row: EntityRow) -> Result<(), HubError>;
    fn delete_entity(&self, unique_id: &str) -> Result<(), HubError>;
    /// Atomically saves the entity row and appends its history record —
    /// the pairing `Entity.set_state` performs inside one writer scope.
    fn set_entity_state(&self, row: EntityRow, history: HistoryRecord) -> Result<(), HubError>;

    fn append_history(&self, record: HistoryRecord) -> Result<(), HubError>;
    fn count_history(&self, filter: &HistoryFilter) -> Result<u64, HubError>;
    fn query_history(&self, filter: &HistoryFilter, limit: Option<u64>, offset: Option<u64>) -> Result<Vec<HistoryRecord>, HubError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, HubError>;
    fn set_setting(&self, key: &str, value: &str) -> Result<(), HubError>;

    fn find_user_by_name(&self, username: &str) -> Result<Option<UserRow>, HubError>;
    fn find_user_by_id(&self, uid: u64) -> Result<Option<UserRow>, HubError>;
    fn list_users(&self) -> Result<Vec<UserRow>, HubError>;
    fn insert_user(&self, username: &str, password_hash: &str, is_admin: bool) -> Result<u64, HubError>;
    fn update_user(&self, uid: u64, username: Option<&str>, password_hash: Option<&str>, is_admin: Option<bool>) -> Result<(), HubError>;
    fn delete_user(&self, uid: u64) -> Result<(), HubError>;
}

/// Small helper over the `settings` table, grounded in
/// `original_source/src/modules/__init__.py`'s `Settings` class: typed
/// get/set with a caller-supplied default.
pub struct Settings<'p, P: Persistence> {
    store: &'p P,
}

impl<'p, P: Persistence> Settings<'p, P> {
    pub fn new(store: &'p P) -> Self {
        Settings { store }
    }

    pub fn get(&self, key: &str, default: &str) -> Result<String, HubError> {
        Ok(self.store.get_setting(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), HubError> {
        self.store.set_setting(key, value)
    }
}

/// SQL `LIKE` semantics (`%` = any run, `_` = any single char), case
/// folded like SQLite's default ASCII-only case-insensitive comparison.
pub(crate) fn sql_like(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('%') => {
                matches(&pattern[1..], text) || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            Some('_') => !text.is_empty() && matches(&pattern[1..], &text[1..]),
            Some(&c) => {
                !text.is_empty() && text[0].to_ascii_lowercase() == c.to_ascii_lowercase() && matches(&pattern[1..], &text[1..])
            }
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_matches_percent_and_underscore() {
        assert!(sql_like("%light%", "Kitchen Light"));
        assert!(sql_like("k_tchen%", "Kitchen Light"));
        assert!(!sql_like("bedroom%", "Kitchen Light"));
    }
}
