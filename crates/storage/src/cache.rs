use std::cell::RefCell;
use std::collections::HashMap;

use tessera_core::{EntityRecord, EntityRef};

/// Last loaded record per entity. Owned by whoever constructs the
/// adapters and shared with them; entries only leave through
/// [`RecordCache::invalidate`] or [`RecordCache::clear`].
#[derive(Debug, Default)]
pub struct RecordCache {
    records: RefCell<HashMap<EntityRef, EntityRecord>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &EntityRef) -> Option<EntityRecord> {
        self.records.borrow().get(entity).cloned()
    }

    pub fn put(&self, record: EntityRecord) {
        self.records.borrow_mut().insert(record.entity, record);
    }

    pub fn invalidate(&self, entity: &EntityRef) -> bool {
        self.records.borrow_mut().remove(entity).is_some()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}
