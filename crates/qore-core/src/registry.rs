// SPDX-License-Identifier: Apache-2.0

//! In-memory schema registry: register models, resolve model/field names to
//! table/column names, and hand out cheap point-in-time snapshots for
//! readers that must not observe a registration in progress.
//!
//! A `RwLock`-guarded `HashMap` behind a thin API, synchronous throughout:
//! schema registration is CPU-bound bookkeeping, never an I/O wait, so
//! there's no reason to pull the async runtime in here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{OrmError, OrmResult};
use crate::schema::Schema;

/// A read-only, point-in-time view over the registry's schemas. Cloning the
/// registry's internal map is cheap (`Arc`-shared `Schema`s), so callers can
/// hold a `RegistrySnapshot` across an `await` without blocking writers.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    schemas: Arc<HashMap<String, Arc<Schema>>>,
}

impl RegistrySnapshot {
    pub fn get(&self, model: &str) -> OrmResult<&Schema> {
        self.schemas
            .get(model)
            .map(|s| s.as_ref())
            .ok_or_else(|| OrmError::model_not_found(model))
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Resolves `model.field` to its physical `(table, column)` pair.
    pub fn resolve_field(&self, model: &str, field: &str) -> OrmResult<(String, String)> {
        let schema = self.get(model)?;
        let f = schema
            .find_field(field)
            .ok_or_else(|| OrmError::field_not_found(model, field))?;
        Ok((schema.effective_table_name(), f.column_name()))
    }

    /// Resolves every field of a model at once, in declaration order.
    pub fn resolve_fields(&self, model: &str) -> OrmResult<Vec<(String, String)>> {
        let schema = self.get(model)?;
        let table = schema.effective_table_name();
        Ok(schema
            .fields
            .iter()
            .map(|f| (table.clone(), f.column_name()))
            .collect())
    }

    pub fn resolve_table(&self, model: &str) -> OrmResult<String> {
        Ok(self.get(model)?.effective_table_name())
    }
}

/// The mutable registry. `register`/`drop_model` take a write lock; every
/// resolver call goes through a cloned [`RegistrySnapshot`] so concurrent
/// readers never block on each other or on a registration elsewhere.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a schema, then validates relation targets
    /// that point at already-registered models (forward references are
    /// allowed; they're checked lazily by [`resolve_relation_target`] since
    /// two models may legitimately reference each other).
    pub fn register(&self, schema: Schema) -> OrmResult<()> {
        schema.validate()?;
        let name = schema.name.clone();
        debug!(model = %name, "registering schema");
        let mut guard = self
            .inner
            .write()
            .expect("schema registry lock poisoned");
        guard.insert(name, Arc::new(schema));
        Ok(())
    }

    pub fn drop_model(&self, model: &str) -> OrmResult<()> {
        let mut guard = self
            .inner
            .write()
            .expect("schema registry lock poisoned");
        if guard.remove(model).is_none() {
            return Err(OrmError::model_not_found(model));
        }
        debug!(model, "dropped schema");
        Ok(())
    }

    pub fn get(&self, model: &str) -> OrmResult<Arc<Schema>> {
        let guard = self.inner.read().expect("schema registry lock poisoned");
        guard
            .get(model)
            .cloned()
            .ok_or_else(|| OrmError::model_not_found(model))
    }

    /// Resolves a relation's target schema, validating that it names a
    /// registered model and that the referenced fields exist on it.
    pub fn resolve_relation_target(&self, relation: &crate::schema::Relation) -> OrmResult<Arc<Schema>> {
        let target = self.get(&relation.target_model)?;
        for field in &relation.referenced_fields {
            if target.find_field(field).is_none() {
                return Err(OrmError::field_not_found(&relation.target_model, field));
            }
        }
        Ok(target)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let guard = self.inner.read().expect("schema registry lock poisoned");
        RegistrySnapshot {
            schemas: Arc::new(guard.clone()),
        }
    }

    pub fn resolve_field(&self, model: &str, field: &str) -> OrmResult<(String, String)> {
        self.snapshot().resolve_field(model, field)
    }

    pub fn resolve_fields(&self, model: &str) -> OrmResult<Vec<(String, String)>> {
        self.snapshot().resolve_fields(model)
    }

    pub fn resolve_table(&self, model: &str) -> OrmResult<String> {
        self.snapshot().resolve_table(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType, Relation, RelationKind, RefAction};

    fn user_schema() -> Schema {
        Schema::new("User")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("name", FieldType::String))
    }

    #[test]
    fn registers_and_resolves() {
        let registry = SchemaRegistry::new();
        registry.register(user_schema()).unwrap();
        assert_eq!(registry.resolve_table("User").unwrap(), "users");
        assert_eq!(
            registry.resolve_field("User", "name").unwrap(),
            ("users".to_string(), "name".to_string())
        );
    }

    #[test]
    fn unknown_model_errors() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.resolve_table("Ghost"),
            Err(OrmError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn drop_model_removes_it() {
        let registry = SchemaRegistry::new();
        registry.register(user_schema()).unwrap();
        registry.drop_model("User").unwrap();
        assert!(matches!(
            registry.get("User"),
            Err(OrmError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn resolves_relation_target_after_both_models_registered() {
        let registry = SchemaRegistry::new();
        registry.register(user_schema()).unwrap();
        let post = Schema::new("Post")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("authorId", FieldType::Int32))
            .relation(Relation {
                name: "author".into(),
                kind: RelationKind::ManyToOne,
                target_model: "User".into(),
                local_fields: vec!["authorId".into()],
                referenced_fields: vec!["id".into()],
                on_delete: RefAction::Cascade,
                on_update: RefAction::NoAction,
            });
        registry.register(post).unwrap();
        let post_schema = registry.get("Post").unwrap();
        let relation = post_schema.find_relation("author").unwrap();
        assert!(registry.resolve_relation_target(relation).is_ok());
    }
}
