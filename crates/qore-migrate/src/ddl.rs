// SPDX-License-Identifier: Apache-2.0

//! Renders a [`Schema`] (or a single missing column/index) into the DDL
//! strings the migrator executes. Every statement here is dialect-aware but
//! otherwise pure — no I/O, so these functions are unit-testable without a
//! live connection.

use qore_core::schema::{DefaultValue, Field, FieldType, Index, Schema};
use qore_core::value::Value;
use qore_core::{OrmError, OrmResult};
use qore_sql::Dialect;

/// `CREATE TABLE` for a schema's own columns and primary key. Foreign-key
/// constraints are deliberately left out — they're emitted separately as
/// `ALTER TABLE ... ADD CONSTRAINT` once every table in the batch exists,
/// which sidesteps ordering entirely (including relation cycles).
pub fn create_table(schema: &Schema, dialect: Dialect) -> OrmResult<String> {
    let table = dialect.quote_ident(&schema.effective_table_name());
    let mut column_defs = Vec::with_capacity(schema.fields.len());

    // SQLite aliases the rowid only when a single INTEGER column is
    // declared `INTEGER PRIMARY KEY` inline; a separate `PRIMARY KEY (...)`
    // table constraint would silently lose that aliasing (and autoincrement
    // already implies a single-field, non-composite key, so this is safe).
    let inline_pk_column = autoincrement_field(schema).filter(|_| {
        matches!(dialect.backend, qore_sql::Backend::Sqlite)
    });

    for field in &schema.fields {
        column_defs.push(column_definition(
            field,
            dialect,
            inline_pk_column.is_some_and(|f| f.name == field.name),
        )?);
    }

    if inline_pk_column.is_none() {
        let pk_fields = schema.primary_key_fields();
        if !pk_fields.is_empty() {
            let columns: OrmResult<Vec<String>> = pk_fields
                .iter()
                .map(|name| resolve_quoted_column(schema, name, dialect))
                .collect();
            column_defs.push(format!("PRIMARY KEY ({})", columns?.join(", ")));
        }
    }

    Ok(format!(
        "CREATE TABLE {table} ({})",
        column_defs.join(", ")
    ))
}

fn autoincrement_field(schema: &Schema) -> Option<&Field> {
    schema.fields.iter().find(|f| f.auto_increment)
}

fn resolve_quoted_column(schema: &Schema, field_name: &str, dialect: Dialect) -> OrmResult<String> {
    let field = schema
        .find_field(field_name)
        .ok_or_else(|| OrmError::field_not_found(&schema.name, field_name))?;
    Ok(dialect.quote_ident(&field.column_name()))
}

fn column_definition(field: &Field, dialect: Dialect, inline_pk: bool) -> OrmResult<String> {
    let column = dialect.quote_ident(&field.column_name());
    let mut sql_type = dialect.map_scalar_type(&field.field_type);
    let mut trailing = String::new();

    if field.auto_increment {
        let (type_override, clause) = dialect.auto_increment_clause(&field.field_type);
        if let Some(t) = type_override {
            sql_type = t;
        }
        trailing.push_str(clause);
    }

    let mut parts = vec![column, sql_type];
    if inline_pk {
        parts.push("PRIMARY KEY".to_string());
    }
    if !trailing.is_empty() {
        parts.push(trailing.trim().to_string());
    }
    if field.unique && !inline_pk {
        parts.push("UNIQUE".to_string());
    }
    if !field.nullable && !inline_pk {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = &field.default_value {
        if let Some(clause) = default_clause(default, dialect)? {
            parts.push(clause);
        }
    }

    Ok(parts.join(" "))
}

/// Renders a field's default as a `DEFAULT ...` clause, or `None` when the
/// default is generated application-side (uuid/cuid) rather than by the
/// database.
fn default_clause(default: &DefaultValue, dialect: Dialect) -> OrmResult<Option<String>> {
    Ok(match default {
        DefaultValue::Literal(value) => Some(format!("DEFAULT {}", literal_sql(value, dialect))),
        DefaultValue::Now => Some("DEFAULT CURRENT_TIMESTAMP".to_string()),
        DefaultValue::AutoIncrement => None,
        DefaultValue::Uuid | DefaultValue::Cuid => None,
        DefaultValue::DbGenerated(expr) => Some(format!("DEFAULT ({expr})")),
    })
}

fn literal_sql(value: &Value, dialect: Dialect) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => dialect.bool_literal(*b).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(_) | Value::Json(_) | Value::Array(_) => {
            format!("'{}'", serde_json::to_string(value).unwrap_or_default().replace('\'', "''"))
        }
    }
}

/// A single `ADD COLUMN` clause, used both standalone and batched into one
/// `ALTER TABLE` per table in [`crate::migrator::Migrator`].
pub fn add_column_clause(field: &Field, dialect: Dialect) -> OrmResult<String> {
    let def = column_definition(field, dialect, false)?;
    Ok(format!("ADD COLUMN {def}"))
}

pub fn alter_table_add_columns(schema: &Schema, columns: &[String], dialect: Dialect) -> String {
    let table = dialect.quote_ident(&schema.effective_table_name());
    format!("ALTER TABLE {table} {}", columns.join(", "))
}

pub fn create_index(schema: &Schema, index: &Index, dialect: Dialect) -> OrmResult<String> {
    let table = dialect.quote_ident(&schema.effective_table_name());
    let index_name = dialect.quote_ident(&index.name);
    let columns: OrmResult<Vec<String>> = index
        .fields
        .iter()
        .map(|f| resolve_quoted_column(schema, f, dialect))
        .collect();
    let unique = if index.unique { "UNIQUE " } else { "" };
    Ok(format!(
        "CREATE {unique}INDEX {index_name} ON {table} ({})",
        columns?.join(", ")
    ))
}

/// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` for one relation whose
/// local fields own the foreign key (`ManyToOne`/`OneToOne` owning side).
/// `OneToMany`/`ManyToMany` relations describe the inverse or join-table
/// side and carry no physical constraint of their own.
pub fn add_foreign_key(schema: &Schema, relation: &qore_core::schema::Relation, dialect: Dialect) -> OrmResult<Option<String>> {
    use qore_core::schema::RelationKind;
    if !matches!(relation.kind, RelationKind::ManyToOne | RelationKind::OneToOne) {
        return Ok(None);
    }
    if relation.local_fields.is_empty() {
        return Ok(None);
    }

    let table = dialect.quote_ident(&schema.effective_table_name());
    let constraint_name = dialect.quote_ident(&format!(
        "fk_{}_{}",
        schema.effective_table_name(),
        relation.name
    ));
    let local_columns: OrmResult<Vec<String>> = relation
        .local_fields
        .iter()
        .map(|f| resolve_quoted_column(schema, f, dialect))
        .collect();

    let ref_table = dialect.quote_ident(&target_table_name(&relation.target_model));
    let ref_columns: Vec<String> = relation
        .referenced_fields
        .iter()
        .map(|f| dialect.quote_ident(&qore_core::inflector::to_snake_case(f)))
        .collect();

    let on_delete = ref_action_sql(relation.on_delete);
    let on_update = ref_action_sql(relation.on_update);

    Ok(Some(format!(
        "ALTER TABLE {table} ADD CONSTRAINT {constraint_name} FOREIGN KEY ({}) REFERENCES {ref_table} ({}) ON DELETE {on_delete} ON UPDATE {on_update}",
        local_columns?.join(", "),
        ref_columns.join(", "),
    )))
}

/// Naive fallback used only when a relation's target schema isn't available
/// to the caller; real callers resolve the target through the registry and
/// pass its `effective_table_name()` instead. Kept for symmetry with the
/// naive defaulting rule documented in the schema specification.
fn target_table_name(model_name: &str) -> String {
    qore_core::inflector::pluralize_snake(model_name)
}

fn ref_action_sql(action: qore_core::schema::RefAction) -> &'static str {
    use qore_core::schema::RefAction;
    match action {
        RefAction::Cascade => "CASCADE",
        RefAction::Restrict => "RESTRICT",
        RefAction::SetNull => "SET NULL",
        RefAction::NoAction => "NO ACTION",
    }
}

pub fn drop_table(table_name: &str, dialect: Dialect) -> String {
    format!("DROP TABLE IF EXISTS {}", dialect.quote_ident(table_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::schema::{Field, FieldType};
    use qore_sql::Backend;

    fn user_schema() -> Schema {
        Schema::new("User")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("email", FieldType::String).unique())
            .field(Field::new("bio", FieldType::String).nullable())
    }

    #[test]
    fn sqlite_auto_increment_uses_inline_integer_primary_key() {
        let sql = create_table(&user_schema(), Backend::Sqlite.dialect()).unwrap();
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(!sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn postgres_auto_increment_uses_serial_and_table_level_pk() {
        let sql = create_table(&user_schema(), Backend::Postgres.dialect()).unwrap();
        assert!(sql.contains("\"id\" SERIAL"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn mysql_auto_increment_keyword() {
        let sql = create_table(&user_schema(), Backend::MySql.dialect()).unwrap();
        assert!(sql.contains("AUTO_INCREMENT"));
    }

    #[test]
    fn composite_key_emits_table_level_primary_key() {
        let schema = Schema::new("PostTag")
            .field(Field::new("postId", FieldType::Int32))
            .field(Field::new("tagId", FieldType::Int32))
            .composite_key(["postId", "tagId"]);
        let sql = create_table(&schema, Backend::Postgres.dialect()).unwrap();
        assert!(sql.contains("PRIMARY KEY (\"post_id\", \"tag_id\")"));
    }

    #[test]
    fn nullable_field_has_no_not_null_clause() {
        let sql = create_table(&user_schema(), Backend::Postgres.dialect()).unwrap();
        assert!(sql.contains("\"bio\" VARCHAR(255)") && !sql.contains("\"bio\" VARCHAR(255) NOT NULL"));
    }

    #[test]
    fn unique_field_gets_unique_constraint() {
        let sql = create_table(&user_schema(), Backend::Postgres.dialect()).unwrap();
        assert!(sql.contains("\"email\" VARCHAR(255) UNIQUE NOT NULL"));
    }
}
