// SPDX-License-Identifier: Apache-2.0

//! The declarative schema representation: models, fields, indexes, and
//! relations, plus the invariants every registered schema must satisfy.

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::inflector::{pluralize_snake, to_snake_case};

/// Scalar (or array-of-scalar) field type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float64,
    Bool,
    DateTime,
    Decimal,
    Json,
    /// Reference to an enum declared elsewhere; persisted as the backend's
    /// string representation.
    Enum(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::Array(_))
    }
}

/// A default value, literal or symbolic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Literal(crate::value::Value),
    Now,
    AutoIncrement,
    Uuid,
    Cuid,
    DbGenerated(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default_value: Option<DefaultValue>,
    /// Overrides the snake_case default when set.
    pub column_name: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default_value: None,
            column_name: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn map_to(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    /// Effective column name: the override, or snake_case(name).
    pub fn column_name(&self) -> String {
        self.column_name
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefAction {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

/// A relation descriptor. Per the two-model cycle note in the design docs,
/// this stores only the target model's *name* (a key back into the
/// registry), never a direct pointer — so `User.posts` and `Post.author`
/// can reference each other without an ownership cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub target_model: String,
    pub local_fields: Vec<String>,
    pub referenced_fields: Vec<String>,
    pub on_delete: RefAction,
    pub on_update: RefAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub table_name: Option<String>,
    pub fields: Vec<Field>,
    pub composite_key: Vec<String>,
    pub indexes: Vec<Index>,
    pub relations: Vec<Relation>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn composite_key(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.composite_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Effective table name: the override, or a naive pluralized snake_case
    /// of the model name.
    pub fn effective_table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| pluralize_snake(&self.name))
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn find_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Ordered primary-key field names: either the single `primaryKey` field
    /// or the composite key, per the invariant enforced in [`validate`].
    pub fn primary_key_fields(&self) -> Vec<&str> {
        if !self.composite_key.is_empty() {
            return self.composite_key.iter().map(String::as_str).collect();
        }
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Validates the invariants listed in the data model specification.
    /// Does not check cross-model relation targets — that's the registry's
    /// job once every schema has been registered.
    pub fn validate(&self) -> OrmResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrmError::schema_invalid("model name must not be empty"));
        }

        let single_pk_count = self.fields.iter().filter(|f| f.primary_key).count();
        let has_composite = !self.composite_key.is_empty();

        if has_composite && single_pk_count > 0 {
            return Err(OrmError::schema_invalid(format!(
                "{}: composite key and per-field primaryKey are mutually exclusive",
                self.name
            )));
        }
        if !has_composite && single_pk_count == 0 {
            return Err(OrmError::schema_invalid(format!(
                "{}: must declare either a primaryKey field or a non-empty compositeKey",
                self.name
            )));
        }

        if has_composite {
            for key_field in &self.composite_key {
                if self.find_field(key_field).is_none() {
                    return Err(OrmError::schema_invalid(format!(
                        "{}: compositeKey references unknown field {}",
                        self.name, key_field
                    )));
                }
            }
        }

        let mut seen_field_names = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen_field_names.insert(field.name.as_str()) {
                return Err(OrmError::schema_invalid(format!(
                    "{}: duplicate field name {}",
                    self.name, field.name
                )));
            }
            if field.auto_increment {
                if !field.field_type.is_integer() {
                    return Err(OrmError::schema_invalid(format!(
                        "{}.{}: autoIncrement requires an integer type",
                        self.name, field.name
                    )));
                }
                if has_composite {
                    return Err(OrmError::schema_invalid(format!(
                        "{}.{}: autoIncrement cannot combine with a composite key",
                        self.name, field.name
                    )));
                }
            }
        }

        let mut seen_columns = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen_columns.insert(field.column_name()) {
                return Err(OrmError::schema_invalid(format!(
                    "{}: duplicate column name {} after mapping",
                    self.name,
                    field.column_name()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> Schema {
        Schema::new("User")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("name", FieldType::String))
            .field(Field::new("email", FieldType::String).unique())
    }

    #[test]
    fn validates_a_well_formed_schema() {
        assert!(user_schema().validate().is_ok());
    }

    #[test]
    fn rejects_missing_primary_key() {
        let schema = Schema::new("Orphan").field(Field::new("name", FieldType::String));
        assert!(matches!(
            schema.validate(),
            Err(OrmError::SchemaInvalid { .. })
        ));
    }

    #[test]
    fn rejects_composite_key_combined_with_field_primary_key() {
        let schema = Schema::new("PostTag")
            .field(Field::new("postId", FieldType::Int32).primary_key())
            .field(Field::new("tagId", FieldType::Int32))
            .composite_key(["postId", "tagId"]);
        assert!(matches!(
            schema.validate(),
            Err(OrmError::SchemaInvalid { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let schema = Schema::new("Dup")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("id", FieldType::String));
        assert!(matches!(
            schema.validate(),
            Err(OrmError::SchemaInvalid { .. })
        ));
    }

    #[test]
    fn defaults_table_and_column_names() {
        let schema = user_schema();
        assert_eq!(schema.effective_table_name(), "users");
        assert_eq!(schema.find_field("email").unwrap().column_name(), "email");

        let camel = Schema::new("OrderItem").field(Field::new("orderId", FieldType::Int32));
        assert_eq!(camel.effective_table_name(), "order_items");
        assert_eq!(camel.find_field("orderId").unwrap().column_name(), "order_id");
    }

    #[test]
    fn auto_increment_requires_integer_type() {
        let schema = Schema::new("Bad").field(
            Field::new("id", FieldType::String)
                .auto_increment(),
        );
        assert!(matches!(
            schema.validate(),
            Err(OrmError::SchemaInvalid { .. })
        ));
    }
}
