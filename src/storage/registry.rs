//! Entity registry
//!
//! Records point at an entity (a behavior, sleep type, mood category, ...).
//! Aggregate queries are scoped by entity, so referencing an unknown entity is
//! a usage error rather than an empty result.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::table::Table;
use crate::storage::types::EntityConfig;

/// Registry for entity definitions
#[derive(Clone)]
pub struct EntityRegistry {
    table: Table<EntityConfig>,
}

impl EntityRegistry {
    pub fn new(table: Table<EntityConfig>) -> Self {
        Self { table }
    }

    /// Register an entity, replacing any previous definition with the same id
    pub fn register(&self, entity: &EntityConfig) -> StorageResult<()> {
        EntityConfig::validate_id(&entity.id)?;
        self.table.put(&entity.id, entity)
    }

    /// Mark an entity inactive (history is kept)
    pub fn deactivate(&self, id: &str) -> StorageResult<EntityConfig> {
        let mut entity = self.require(id)?;
        entity.active = false;
        self.table.put(id, &entity)?;
        Ok(entity)
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<EntityConfig>> {
        self.table.get(id)
    }

    /// Get an entity or fail with `EntityNotFound`
    pub fn require(&self, id: &str) -> StorageResult<EntityConfig> {
        EntityConfig::validate_id(id)?;
        self.get(id)?
            .ok_or_else(|| StorageError::EntityNotFound(id.to_string()))
    }

    pub fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// All entities ordered by id
    pub fn all(&self) -> StorageResult<Vec<EntityConfig>> {
        self.table.values()
    }
}
