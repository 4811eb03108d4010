//! In-process reference implementation of [`Persistence`].
//!
//! Stands in for the single-writer SQL-like store spec.md treats as
//! external. A single `Mutex<Tables>` plays the role of the original's
//! reentrant writer lock: `writer` snapshots the guarded state before
//! running the closure and restores it on `Err`, giving the same
//! commit-on-success/rollback-on-failure behavior as
//! `original_source/src/util/database.py`'s `Database.writer()` without
//! needing a real transaction log.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::HubError;

use super::{sql_like, EntityRow, HistoryFilter, HistoryRecord, Persistence, UserRow};

#[derive(Clone, Default)]
pub struct Tables {
    entities: HashMap<String, EntityRow>,
    history: Vec<HistoryRecord>,
    settings: HashMap<String, String>,
    users: Vec<UserRow>,
    next_uid: u64,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: Mutex::new(Tables {
                next_uid: 1,
                ..Tables::default()
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.lock().unwrap())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl Persistence for MemoryStore {
    type Tx = Tables;

    fn writer<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, HubError>) -> Result<T, HubError> {
        let mut guard = self.tables.lock().unwrap();
        let snapshot = guard.clone();
        match f(&mut guard) {
            Ok(value) => Ok(value),
            Err(err) => {
                *guard = snapshot;
                Err(err)
            }
        }
    }

    fn find_entity(&self, unique_id: &str) -> Result<Option<EntityRow>, HubError> {
        Ok(self.read(|t| t.entities.get(unique_id).cloned()))
    }

    fn list_entities(&self, type_id: Option<u16>, name_pattern: Option<&str>) -> Result<Vec<EntityRow>, HubError> {
        let mut rows: Vec<EntityRow> = self.read(|t| {
            t.entities
                .values()
                .filter(|row| type_id.map_or(true, |t| row.type_id == t))
                .filter(|row| name_pattern.map_or(true, |p| sql_like(p, &row.name)))
                .cloned()
                .collect()
        });
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    fn save_entity(&self, row: EntityRow) -> Result<(), HubError> {
        self.writer(|t| {
            t.entities.insert(row.unique_id.clone(), row);
            Ok(())
        })
    }

    fn delete_entity(&self, unique_id: &str) -> Result<(), HubError> {
        self.writer(|t| {
            t.entities.remove(unique_id);
            Ok(())
        })
    }

    fn set_entity_state(&self, row: EntityRow, history: HistoryRecord) -> Result<(), HubError> {
        self.writer(|t| {
            t.entities.insert(row.unique_id.clone(), row);
            t.history.push(history);
            Ok(())
        })
    }

    fn append_history(&self, record: HistoryRecord) -> Result<(), HubError> {
        self.writer(|t| {
            t.history.push(record);
            Ok(())
        })
    }

    fn count_history(&self, filter: &HistoryFilter) -> Result<u64, HubError> {
        Ok(self.read(|t| t.history.iter().filter(|r| history_matches(r, filter)).count() as u64))
    }

    fn query_history(&self, filter: &HistoryFilter, limit: Option<u64>, offset: Option<u64>) -> Result<Vec<HistoryRecord>, HubError> {
        let mut rows: Vec<HistoryRecord> = self.read(|t| t.history.iter().filter(|r| history_matches(r, filter)).cloned().collect());
        rows.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        let offset = offset.unwrap_or(0) as usize;
        let rows = if offset < rows.len() { rows.split_off(offset) } else { Vec::new() };
        Ok(match limit {
            Some(limit) => rows.into_iter().take(limit as usize).collect(),
            None => rows,
        })
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, HubError> {
        Ok(self.read(|t| t.settings.get(key).cloned()))
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), HubError> {
        self.writer(|t| {
            t.settings.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<UserRow>, HubError> {
        Ok(self.read(|t| t.users.iter().find(|u| u.username == username).cloned()))
    }

    fn find_user_by_id(&self, uid: u64) -> Result<Option<UserRow>, HubError> {
        Ok(self.read(|t| t.users.iter().find(|u| u.uid == uid).cloned()))
    }

    fn list_users(&self) -> Result<Vec<UserRow>, HubError> {
        Ok(self.read(|t| t.users.clone()))
    }

    fn insert_user(&self, username: &str, password_hash: &str, is_admin: bool) -> Result<u64, HubError> {
        self.writer(|t| {
            let uid = t.next_uid;
            t.next_uid += 1;
            t.users.push(UserRow {
                uid,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                is_admin,
            });
            Ok(uid)
        })
    }

    fn update_user(&self, uid: u64, username: Option<&str>, password_hash: Option<&str>, is_admin: Option<bool>) -> Result<(), HubError> {
        self.writer(|t| {
            let user = t
                .users
                .iter_mut()
                .find(|u| u.uid == uid)
                .ok_or_else(|| HubError::Persistence(format!("no such user: {}", uid)))?;
            if let Some(username) = username {
                user.username = username.to_string();
            }
            if let Some(password_hash) = password_hash {
                user.password_hash = password_hash.to_string();
            }
            if let Some(is_admin) = is_admin {
                user.is_admin = is_admin;
            }
            Ok(())
        })
    }

    fn delete_user(&self, uid: u64) -> Result<(), HubError> {
        self.writer(|t| {
            t.users.retain(|u| u.uid != uid);
            Ok(())
        })
    }
}

fn history_matches(record: &HistoryRecord, filter: &HistoryFilter) -> bool {
    filter.from.map_or(true, |from| record.timestamp >= from)
        && filter.to.map_or(true, |to| record.timestamp <= to)
        && filter.entity_id.as_deref().map_or(true, |eid| record.entity_id == eid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::HistoryKind;

    #[test]
    fn writer_rolls_back_on_error() {
        let store = MemoryStore::new();
        let result: Result<(), HubError> = store.writer(|t| {
            t.settings.insert("k".into(), "v".into());
            Err(HubError::Persistence("rollback".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.get_setting("k").unwrap(), None);
    }

    #[test]
    fn writer_commits_on_success() {
        let store = MemoryStore::new();
        store.set_setting("k", "v").unwrap();
        assert_eq!(store.get_setting("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn list_entities_orders_by_name_even_without_filters() {
        let store = MemoryStore::new();
        store
            .save_entity(EntityRow {
                unique_id: "b".into(),
                type_id: 100,
                name: "Zeta".into(),
                state_id: 1,
                state_value: None,
                last_checkin: 0.0,
            })
            .unwrap();
        store
            .save_entity(EntityRow {
                unique_id: "a".into(),
                type_id: 100,
                name: "Alpha".into(),
                state_id: 1,
                state_value: None,
                last_checkin: 0.0,
            })
            .unwrap();
        let rows = store.list_entities(None, None).unwrap();
        assert_eq!(rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn set_entity_state_appends_exactly_one_history_row() {
        let store = MemoryStore::new();
        let row = EntityRow {
            unique_id: "x".into(),
            type_id: 100,
            name: "Lamp".into(),
            state_id: 2,
            state_value: Some("1".into()),
            last_checkin: 1.0,
        };
        store
            .set_entity_state(
                row,
                HistoryRecord {
                    timestamp: 1.0,
                    entity_id: "x".into(),
                    entity_name: "Lamp".into(),
                    action: "State changed to On".into(),
                    kind: HistoryKind::State,
                },
            )
            .unwrap();
        assert_eq!(store.count_history(&HistoryFilter::default()).unwrap(), 1);
    }
}
