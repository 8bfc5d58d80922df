//! One document collection.

use mergesync_model::{MasterFilter, Record, RecordId};
use std::collections::BTreeMap;

/// Documents of one collection, keyed by id.
#[derive(Debug, Clone, Default)]
pub(crate) struct Collection {
    documents: BTreeMap<RecordId, Record>,
}

impl Collection {
    /// Returns documents matching a filter, in id order, honoring its limit.
    pub fn find(&self, filter: &MasterFilter) -> Vec<Record> {
        let matching = self.documents.values().filter(|doc| filter.matches(doc));
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Counts documents matching a filter (the limit is ignored).
    pub fn count(&self, filter: &MasterFilter) -> usize {
        self.documents.values().filter(|doc| filter.matches(doc)).count()
    }

    /// Inserts or replaces a document.
    pub fn upsert(&mut self, record: Record) {
        self.documents.insert(record.id.clone(), record);
    }

    /// Inserts a document under its own id, or under the first free
    /// alternative when that id is taken. Returns the id used.
    pub fn insert(&mut self, mut record: Record) -> RecordId {
        if self.documents.contains_key(&record.id) {
            let max_int = self
                .documents
                .keys()
                .filter_map(RecordId::as_int)
                .max()
                .unwrap_or(0);
            let free = record
                .id
                .alternatives(record.uuid(), max_int)
                .find(|id| !self.documents.contains_key(id));
            if let Some(free) = free {
                record.id = free;
            }
        }
        let id = record.id.clone();
        self.documents.insert(id.clone(), record);
        id
    }

    /// Returns a document by id.
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.documents.get(id)
    }

    /// Returns a mutable document by id.
    pub fn get_mut(&mut self, id: &RecordId) -> Option<&mut Record> {
        self.documents.get_mut(id)
    }

    /// Physically removes a document.
    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        self.documents.remove(id)
    }

}
