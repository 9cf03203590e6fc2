// SPDX-License-Identifier: Apache-2.0

//! Field mapper: turns a raw backend [`Row`](crate::value::Row) (keyed by
//! column name) into a model-shaped row (keyed by field name), coercing
//! each column's dynamic value to the type the schema declares.
//!
//! This is the single seam where "the database returned a string-encoded
//! decimal" or "SQLite returned 0/1 for a bool column" gets normalized, so
//! every caller above the driver boundary sees the schema's declared type
//! regardless of which backend produced the row.

use std::collections::HashMap;

use crate::error::{OrmError, OrmResult};
use crate::schema::{FieldType, Schema};
use crate::value::{Row, Value};

/// Stateless hydrator plus a small cache of column->field lookups, since
/// the same schema is hydrated against on every row of a result set.
#[derive(Default)]
pub struct FieldMapper {
    column_index_cache: std::sync::RwLock<HashMap<String, HashMap<String, String>>>,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a raw, column-keyed row into a field-keyed row, coercing
    /// each value to its field's declared [`FieldType`]. Only columns
    /// actually present in `raw` are emitted — a `.select()`'d row that
    /// omits a field must stay omitted here too, not fabricate a `NULL`
    /// for it, since "not requested" and "NULL in the database" are
    /// different facts. A raw column with no matching field (e.g. an
    /// alias a raw SQL fragment introduced) passes through unchanged
    /// under its column name.
    pub fn hydrate(&self, schema: &Schema, raw: &Row) -> OrmResult<Row> {
        let column_to_field = self.column_index(schema);
        let mut out = Row::new();
        for (column, value) in raw.values.iter() {
            match column_to_field.get(column) {
                Some(field_name) => {
                    let field = schema
                        .find_field(field_name)
                        .expect("column_to_field only maps to fields present on schema");
                    let coerced = coerce(schema, field_name, &field.field_type, value.clone())?;
                    out.insert(field_name.clone(), coerced);
                }
                None => out.insert(column.clone(), value.clone()),
            }
        }
        Ok(out)
    }

    /// Column name -> field name, the reverse of a schema's declared
    /// `field.column_name()` mapping.
    fn column_index(&self, schema: &Schema) -> HashMap<String, String> {
        if let Some(cached) = self
            .column_index_cache
            .read()
            .expect("mapper cache lock poisoned")
            .get(&schema.name)
        {
            return cached.clone();
        }
        let index: HashMap<String, String> = schema
            .fields
            .iter()
            .map(|f| (f.column_name(), f.name.clone()))
            .collect();
        self.column_index_cache
            .write()
            .expect("mapper cache lock poisoned")
            .insert(schema.name.clone(), index.clone());
        index
    }
}

/// Coerces a raw dynamic value into the shape a field's declared type
/// expects. NULL always passes through for nullable fields; a NULL on a
/// non-nullable field is a backend integrity fault, not ours to paper over,
/// so it's surfaced as-is and left for the caller to reject if it matters.
fn coerce(schema: &Schema, field_name: &str, field_type: &FieldType, value: Value) -> OrmResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |actual: &str| {
        OrmError::TypeMismatch {
            model: schema.name.clone(),
            field: field_name.to_string(),
            expected: format!("{field_type:?}"),
            actual: actual.to_string(),
        }
    };

    match field_type {
        FieldType::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            Value::Text(ref s) => match s.as_str() {
                "t" | "true" | "1" => Ok(Value::Bool(true)),
                "f" | "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch("text")),
            },
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::Int32 | FieldType::Int64 => match value {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Bool(b) => Ok(Value::Int(if b { 1 } else { 0 })),
            Value::Text(ref s) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch("text")),
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::Float64 | FieldType::Decimal => match value {
            Value::Float(f) => Ok(Value::Float(f)),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Text(ref s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch("text")),
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::String | FieldType::Enum(_) => match value {
            Value::Text(s) => Ok(Value::Text(s)),
            Value::Int(i) => Ok(Value::Text(i.to_string())),
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::DateTime => match value {
            Value::Text(s) => Ok(Value::Text(s)),
            Value::Int(i) => Ok(Value::Text(i.to_string())),
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::Json => match value {
            Value::Json(j) => Ok(Value::Json(j)),
            Value::Text(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|_| mismatch("text")),
            other => Err(mismatch(&format!("{other:?}"))),
        },
        FieldType::Array(inner) => match value {
            Value::Array(items) => {
                let coerced: OrmResult<Vec<Value>> = items
                    .into_iter()
                    .map(|item| coerce(schema, field_name, inner, item))
                    .collect();
                Ok(Value::Array(coerced?))
            }
            other => Err(mismatch(&format!("{other:?}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Schema {
        Schema::new("User")
            .field(Field::new("id", FieldType::Int32).auto_increment())
            .field(Field::new("isActive", FieldType::Bool))
            .field(Field::new("createdAt", FieldType::DateTime))
    }

    #[test]
    fn hydrates_and_coerces_sqlite_style_bool() {
        let mapper = FieldMapper::new();
        let s = schema();
        let mut raw = Row::new();
        raw.insert("id", Value::Int(1));
        raw.insert("is_active", Value::Int(1));
        raw.insert("created_at", Value::Text("2024-01-01T00:00:00Z".into()));

        let hydrated = mapper.hydrate(&s, &raw).unwrap();
        assert_eq!(hydrated.get("isActive"), Some(&Value::Bool(true)));
        assert_eq!(hydrated.get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn column_absent_from_raw_row_is_omitted_not_null() {
        let mapper = FieldMapper::new();
        let s = schema();
        let mut raw = Row::new();
        raw.insert("id", Value::Int(1));
        let hydrated = mapper.hydrate(&s, &raw).unwrap();
        assert_eq!(hydrated.get("id"), Some(&Value::Int(1)));
        assert_eq!(hydrated.get("isActive"), None);
        assert_eq!(hydrated.get("createdAt"), None);
    }

    #[test]
    fn unknown_raw_column_passes_through_under_its_own_name() {
        let mapper = FieldMapper::new();
        let s = schema();
        let mut raw = Row::new();
        raw.insert("id", Value::Int(1));
        raw.insert("total_count", Value::Int(42));
        let hydrated = mapper.hydrate(&s, &raw).unwrap();
        assert_eq!(hydrated.get("total_count"), Some(&Value::Int(42)));
    }

    #[test]
    fn type_mismatch_is_reported_with_model_and_field() {
        let mapper = FieldMapper::new();
        let s = schema();
        let mut raw = Row::new();
        raw.insert("is_active", Value::Json(serde_json::json!({"x": 1})));
        let err = mapper.hydrate(&s, &raw).unwrap_err();
        match err {
            OrmError::TypeMismatch { model, field, .. } => {
                assert_eq!(model, "User");
                assert_eq!(field, "isActive");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }
}
