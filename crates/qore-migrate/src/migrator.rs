// SPDX-License-Identifier: Apache-2.0

//! Introspect -> diff -> order -> execute. [`Migrator::sync_schemas`] is the
//! only entry point; everything else in this module is a pure helper so the
//! diff/order phases can be unit-tested without a live connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use qore_core::registry::RegistrySnapshot;
use qore_core::schema::{RelationKind, Schema};
use qore_core::{OrmError, OrmResult, SchemaRegistry};
use qore_drivers::{Driver, TableInfo};
use qore_sql::Dialect;

use crate::ddl;
use crate::report::{MigrationReport, MismatchSeverity, TypeMismatch};

/// Serializes `syncSchemas` calls against one backend instance: concurrent
/// callers queue on the mutex and each observes an already-converged
/// database, per the concurrency model in the specification.
pub struct Migrator {
    driver: Arc<dyn Driver>,
    registry: Arc<SchemaRegistry>,
    lock: Mutex<()>,
}

impl Migrator {
    pub fn new(driver: Arc<dyn Driver>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            driver,
            registry,
            lock: Mutex::new(()),
        }
    }

    pub async fn sync_schemas(&self) -> OrmResult<MigrationReport> {
        let _guard = self.lock.lock().await;
        let dialect = self.driver.dialect();
        let introspected = self.driver.introspect().await?;
        let by_table: HashMap<&str, &TableInfo> =
            introspected.iter().map(|t| (t.name.as_str(), t)).collect();

        let snapshot = self.registry.snapshot();
        let ordered = topological_order(&snapshot)?;

        let mut report = MigrationReport::default();
        let mut structural_ddl = Vec::new();
        let mut fk_ddl = Vec::new();

        for schema in &ordered {
            let existing = by_table.get(schema.effective_table_name().as_str()).copied();
            match existing {
                None => {
                    let create_sql = ddl::create_table(schema, dialect)?;
                    info!(model = %schema.name, "planning CREATE TABLE");
                    structural_ddl.push(create_sql.clone());
                    report.created_tables.push(create_sql);
                    for index in &schema.indexes {
                        let sql = ddl::create_index(schema, index, dialect)?;
                        structural_ddl.push(sql.clone());
                        report.created_indexes.push(sql);
                    }
                }
                Some(table) => {
                    self.diff_existing_table(schema, table, dialect, &mut structural_ddl, &mut report)
                        .await?;
                }
            }
        }

        // Second pass: foreign-key constraints, once every table in the
        // batch exists. This is also how relation cycles resolve — neither
        // side needs the other's table to exist yet when its own
        // CREATE TABLE runs.
        for schema in &ordered {
            for relation in &schema.relations {
                let target = self.registry.resolve_relation_target(relation)?;
                if foreign_key_exists(by_table.get(schema.effective_table_name().as_str()).copied(), relation) {
                    continue;
                }
                if let Some(sql) = add_foreign_key_against(schema, relation, &target, dialect)? {
                    fk_ddl.push(sql.clone());
                    report.added_foreign_keys.push(sql);
                }
            }
        }

        if !structural_ddl.is_empty() {
            self.driver.execute_ddl(&structural_ddl).await?;
        }
        if !fk_ddl.is_empty() {
            self.driver.execute_ddl(&fk_ddl).await?;
        }

        report.executed_ddl = structural_ddl.into_iter().chain(fk_ddl).collect();
        if report.is_noop() {
            debug!("syncSchemas: database already converged, no DDL executed");
        }
        Ok(report)
    }

    async fn diff_existing_table(
        &self,
        schema: &Schema,
        table: &TableInfo,
        dialect: Dialect,
        structural_ddl: &mut Vec<String>,
        report: &mut MigrationReport,
    ) -> OrmResult<()> {
        let existing_columns: HashMap<&str, &qore_drivers::ColumnInfo> =
            table.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut add_column_clauses = Vec::new();
        for field in &schema.fields {
            let column_name = field.column_name();
            let Some(existing) = existing_columns.get(column_name.as_str()) else {
                if !field.nullable && field.default_value.is_none() {
                    let non_empty = self.table_is_non_empty(&schema.effective_table_name(), dialect).await?;
                    if non_empty {
                        return Err(OrmError::migration_unsafe(format!(
                            "{}.{}: adding a NOT NULL column with no default to a non-empty table",
                            schema.name, field.name
                        )));
                    }
                }
                let clause = ddl::add_column_clause(field, dialect)?;
                add_column_clauses.push(clause.clone());
                report.added_columns.push(format!("{}: {}", schema.effective_table_name(), clause));
                continue;
            };

            let declared = dialect.map_scalar_type(&field.field_type);
            if !types_equivalent(&declared, &existing.data_type) {
                let severity = classify_mismatch(&existing.data_type, &declared);
                if severity == MismatchSeverity::Narrowing {
                    warn!(
                        model = %schema.name, field = %field.name,
                        physical = %existing.data_type, declared = %declared,
                        "narrowing type mismatch detected, leaving column unchanged"
                    );
                }
                report.type_mismatches.push(TypeMismatch {
                    model: schema.name.clone(),
                    field: field.name.clone(),
                    column: column_name.clone(),
                    physical_type: existing.data_type.clone(),
                    declared_type: declared,
                    severity,
                });
            }
        }

        if !add_column_clauses.is_empty() {
            structural_ddl.push(ddl::alter_table_add_columns(schema, &add_column_clauses, dialect));
        }

        let existing_indexes: HashSet<&str> = table.indexes.iter().map(|i| i.name.as_str()).collect();
        for index in &schema.indexes {
            if !existing_indexes.contains(index.name.as_str()) {
                let sql = ddl::create_index(schema, index, dialect)?;
                structural_ddl.push(sql.clone());
                report.created_indexes.push(sql);
            }
        }

        Ok(())
    }

    async fn table_is_non_empty(&self, table_name: &str, dialect: Dialect) -> OrmResult<bool> {
        let quoted = dialect.quote_ident(table_name);
        let row = self
            .driver
            .query_row(&format!("SELECT COUNT(*) AS row_count FROM {quoted}"), &[])
            .await?;
        Ok(row
            .and_then(|r| r.get("row_count").and_then(|v| v.as_int()))
            .unwrap_or(0)
            > 0)
    }

    pub async fn drop_model(&self, model: &str) -> OrmResult<()> {
        let _guard = self.lock.lock().await;
        let table_name = self.registry.resolve_table(model)?;
        self.driver
            .execute_ddl(&[ddl::drop_table(&table_name, self.driver.dialect())])
            .await?;
        self.registry.drop_model(model)?;
        Ok(())
    }
}

fn foreign_key_exists(table: Option<&TableInfo>, relation: &qore_core::schema::Relation) -> bool {
    let Some(table) = table else { return false };
    if relation.local_fields.is_empty() {
        return false;
    }
    let expected_column = qore_core::inflector::to_snake_case(&relation.local_fields[0]);
    table
        .foreign_keys
        .iter()
        .any(|fk| fk.column == expected_column)
}

fn add_foreign_key_against(
    schema: &Schema,
    relation: &qore_core::schema::Relation,
    target: &Schema,
    dialect: Dialect,
) -> OrmResult<Option<String>> {
    if !matches!(relation.kind, RelationKind::ManyToOne | RelationKind::OneToOne) {
        return Ok(None);
    }
    let Some(base) = ddl::add_foreign_key(schema, relation, dialect)? else {
        return Ok(None);
    };
    // `add_foreign_key` guesses the target table name naively; rewrite the
    // REFERENCES clause with the registry's actual resolved table name so a
    // `@@map`-overridden target is honored.
    let naive = dialect.quote_ident(&qore_core::inflector::pluralize_snake(&relation.target_model));
    let actual = dialect.quote_ident(&target.effective_table_name());
    Ok(Some(base.replacen(&naive, &actual, 1)))
}

/// Kahn's algorithm over the `ManyToOne`/`OneToOne` owning-side edges.
/// Cycles are broken by falling back to registry order for whatever
/// remains once no more zero-indegree nodes exist — safe because foreign
/// keys are always applied in a FK-constraint second pass, never inline.
fn topological_order(snapshot: &RegistrySnapshot) -> OrmResult<Vec<Arc<Schema>>> {
    let mut schemas: HashMap<String, Arc<Schema>> = HashMap::new();
    for name in snapshot.models() {
        schemas.insert(name.to_string(), Arc::new(snapshot.get(name)?.clone()));
    }

    let mut indegree: HashMap<String, usize> = schemas.keys().map(|k| (k.clone(), 0)).collect();
    let mut edges: HashMap<String, Vec<String>> = schemas.keys().map(|k| (k.clone(), Vec::new())).collect();

    for (name, schema) in &schemas {
        for relation in &schema.relations {
            if !matches!(relation.kind, RelationKind::ManyToOne | RelationKind::OneToOne) {
                continue;
            }
            if relation.target_model == *name || !schemas.contains_key(&relation.target_model) {
                continue;
            }
            edges.get_mut(&relation.target_model).unwrap().push(name.clone());
            *indegree.get_mut(name).unwrap() += 1;
        }
    }

    let mut queue: Vec<String> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    queue.sort();

    let mut ordered_names = Vec::new();
    let mut seen = HashSet::new();
    while let Some(name) = queue.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        ordered_names.push(name.clone());
        let mut next = Vec::new();
        for dependent in edges.get(&name).cloned().unwrap_or_default() {
            let d = indegree.get_mut(&dependent).unwrap();
            *d -= 1;
            if *d == 0 {
                next.push(dependent);
            }
        }
        next.sort();
        queue.extend(next);
    }

    // Anything left belongs to a cycle; append in deterministic name order.
    let mut remaining: Vec<String> = schemas
        .keys()
        .filter(|n| !seen.contains(*n))
        .cloned()
        .collect();
    remaining.sort();
    ordered_names.extend(remaining);

    Ok(ordered_names
        .into_iter()
        .map(|name| schemas.remove(&name).unwrap())
        .collect())
}

/// Loose equivalence: dialect type strings carry size/precision qualifiers
/// (`VARCHAR(255)`) that introspection may report without them, so compare
/// on the base keyword only.
fn types_equivalent(declared: &str, physical: &str) -> bool {
    base_type(declared).eq_ignore_ascii_case(base_type(physical))
}

fn base_type(t: &str) -> &str {
    t.split(['(', ' ']).next().unwrap_or(t)
}

/// Very small family-rank table used to classify a detected mismatch as
/// widening (safe to apply later) or narrowing (needs an operator's call).
/// Unrelated families (e.g. text -> numeric) are treated as narrowing,
/// matching the conservative default the design notes settle on.
fn classify_mismatch(physical: &str, declared: &str) -> MismatchSeverity {
    const STRING_RANK: &[&str] = &["VARCHAR", "CHAR", "TEXT"];
    const INT_RANK: &[&str] = &["SMALLINT", "INTEGER", "INT", "BIGINT"];

    let rank = |family: &[&str], t: &str| family.iter().position(|f| base_type(t).eq_ignore_ascii_case(f));

    if let (Some(p), Some(d)) = (rank(STRING_RANK, physical), rank(STRING_RANK, declared)) {
        return if d >= p { MismatchSeverity::Widening } else { MismatchSeverity::Narrowing };
    }
    if let (Some(p), Some(d)) = (rank(INT_RANK, physical), rank(INT_RANK, declared)) {
        return if d >= p { MismatchSeverity::Widening } else { MismatchSeverity::Narrowing };
    }
    MismatchSeverity::Narrowing
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::schema::{Field, FieldType, RefAction, Relation};
    use qore_sql::Backend;

    #[test]
    fn topological_order_places_referenced_model_first() {
        let registry = SchemaRegistry::new();
        registry
            .register(
                Schema::new("User")
                    .field(Field::new("id", FieldType::Int32).auto_increment()),
            )
            .unwrap();
        registry
            .register(
                Schema::new("Post")
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
                    }),
            )
            .unwrap();

        let ordered = topological_order(&registry.snapshot()).unwrap();
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["User", "Post"]);
    }

    #[test]
    fn topological_order_tolerates_a_cycle() {
        let registry = SchemaRegistry::new();
        registry
            .register(
                Schema::new("A")
                    .field(Field::new("id", FieldType::Int32).auto_increment())
                    .field(Field::new("bId", FieldType::Int32).nullable())
                    .relation(Relation {
                        name: "b".into(),
                        kind: RelationKind::ManyToOne,
                        target_model: "B".into(),
                        local_fields: vec!["bId".into()],
                        referenced_fields: vec!["id".into()],
                        on_delete: RefAction::SetNull,
                        on_update: RefAction::NoAction,
                    }),
            )
            .unwrap();
        registry
            .register(
                Schema::new("B")
                    .field(Field::new("id", FieldType::Int32).auto_increment())
                    .field(Field::new("aId", FieldType::Int32).nullable())
                    .relation(Relation {
                        name: "a".into(),
                        kind: RelationKind::ManyToOne,
                        target_model: "A".into(),
                        local_fields: vec!["aId".into()],
                        referenced_fields: vec!["id".into()],
                        on_delete: RefAction::SetNull,
                        on_update: RefAction::NoAction,
                    }),
            )
            .unwrap();

        let ordered = topological_order(&registry.snapshot()).unwrap();
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn widening_string_mismatch_is_classified_as_safe() {
        assert_eq!(classify_mismatch("VARCHAR(255)", "TEXT"), MismatchSeverity::Widening);
    }

    #[test]
    fn narrowing_string_mismatch_is_flagged_unsafe() {
        assert_eq!(classify_mismatch("TEXT", "VARCHAR(255)"), MismatchSeverity::Narrowing);
    }

    #[test]
    fn unrelated_family_mismatch_defaults_to_narrowing() {
        assert_eq!(classify_mismatch("INTEGER", "TEXT"), MismatchSeverity::Narrowing);
    }

    #[test]
    fn sqlite_dialect_is_usable_for_ddl_rendering_in_this_module() {
        let _ = Backend::Sqlite.dialect();
    }
}
