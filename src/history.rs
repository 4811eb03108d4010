//! History Log facade (§4.4): time/entity-filtered queries over the
//! append-only `history` table, grounded in
//! `original_source/src/entities/__init__.py`'s `EntityHistory` classmethods.

use crate::error::HubError;
use crate::persistence::{HistoryFilter, HistoryRecord, Persistence};

pub struct HistoryLog<'p, P: Persistence> {
    store: &'p P,
}

impl<'p, P: Persistence> HistoryLog<'p, P> {
    pub fn new(store: &'p P) -> Self {
        HistoryLog { store }
    }

    /// Time filters are inclusive at both bounds.
    pub fn count(&self, from: Option<f64>, to: Option<f64>, entity_id: Option<&str>) -> Result<u64, HubError> {
        self.store.count_history(&HistoryFilter { from, to, entity_id: entity_id.map(str::to_string) })
    }

    /// Ordered by `timestamp DESC`.
    pub fn query(&self, from: Option<f64>, to: Option<f64>, entity_id: Option<&str>, limit: Option<u64>, offset: Option<u64>) -> Result<Vec<HistoryRecord>, HubError> {
        self.store
            .query_history(&HistoryFilter { from, to, entity_id: entity_id.map(str::to_string) }, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::register_builtin_types;
    use crate::entities::{Entity, EntityType, Registry, TYPE_GENERIC_POWER};
    use crate::persistence::memory_store::MemoryStore;

    #[test]
    fn time_bounds_are_inclusive() {
        register_builtin_types();
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        let mut entity = Entity::new("e1".into(), EntityType::find(TYPE_GENERIC_POWER).unwrap());
        registry.set_state(&mut entity, crate::entities::STATE_ON, Some("1".into()), true, 10.0).unwrap();

        let log = HistoryLog::new(&store);
        assert_eq!(log.count(Some(10.0), Some(10.0), None).unwrap(), 1);
        assert_eq!(log.count(Some(11.0), None, None).unwrap(), 0);
    }

    #[test]
    fn query_orders_by_timestamp_desc() {
        register_builtin_types();
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        let mut entity = Entity::new("e1".into(), EntityType::find(TYPE_GENERIC_POWER).unwrap());
        registry.set_state(&mut entity, crate::entities::STATE_ON, Some("1".into()), true, 10.0).unwrap();
        registry.set_state(&mut entity, crate::entities::STATE_OFF, Some("0".into()), true, 20.0).unwrap();

        let log = HistoryLog::new(&store);
        let rows = log.query(None, None, None, None, None).unwrap();
        assert_eq!(rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![20.0, 10.0]);
    }
}
