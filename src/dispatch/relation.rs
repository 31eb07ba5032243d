//! Directory of relation descriptors.
//!
//! PostgreSQL sends a Relation message before the first row change for each
//! table in a session, and again whenever the table's definition changes.
//! Row changes only carry the relation id, so the latest descriptor per id
//! is kept here to resolve schema, table and column types.

use std::collections::HashMap;

use crate::postgres::RelationDescriptor;

#[derive(Debug, Default)]
pub struct RelationDirectory {
    relations: HashMap<u32, RelationDescriptor>,
}

impl RelationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the descriptor, replacing any previous one for the same id.
    pub fn update(&mut self, descriptor: RelationDescriptor) {
        self.relations.insert(descriptor.id, descriptor);
    }

    pub fn lookup(&self, id: u32) -> Option<&RelationDescriptor> {
        self.relations.get(&id)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
