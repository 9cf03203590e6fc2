// SPDX-License-Identifier: Apache-2.0

//! Compiles [`crate::ir::Query`] into dialect SQL plus a positional
//! argument vector. Field names are resolved against a registry snapshot
//! before any SQL is emitted, so an unknown field fails before a single
//! placeholder is assigned.

use qore_core::registry::RegistrySnapshot;
use qore_core::value::Value;
use qore_core::{OrmError, OrmResult};

use crate::dialect::Dialect;
use crate::ir::{Condition, ConditionValue, Direction, OrderTerm, Op, Query};

/// A compiled statement: SQL text with dialect placeholders already
/// substituted, and the argument vector in left-to-right bind order.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub sql: String,
    pub args: Vec<Value>,
}

pub struct Compiler<'a> {
    dialect: Dialect,
    registry: &'a RegistrySnapshot,
}

impl<'a> Compiler<'a> {
    pub fn new(dialect: Dialect, registry: &'a RegistrySnapshot) -> Self {
        Self { dialect, registry }
    }

    pub fn compile(&self, query: &Query) -> OrmResult<Compiled> {
        match query {
            Query::Select(q) => self.compile_select(q),
            Query::Insert(q) => self.compile_insert(q),
            Query::Update(q) => self.compile_update(q),
            Query::Delete(q) => self.compile_delete(q),
            Query::Raw(q) => Ok(Compiled {
                sql: q.sql.clone(),
                args: q.args.clone(),
            }),
        }
    }

    fn resolve_column(&self, model: &str, field: &str) -> OrmResult<String> {
        let (_, column) = self.registry.resolve_field(model, field)?;
        Ok(self.dialect.quote_ident(&column))
    }

    fn resolve_table(&self, model: &str) -> OrmResult<String> {
        let table = self.registry.resolve_table(model)?;
        Ok(self.dialect.quote_ident(&table))
    }

    fn compile_select(&self, q: &crate::ir::SelectQuery) -> OrmResult<Compiled> {
        let table = self.resolve_table(&q.model)?;
        let mut args = Vec::new();

        let columns = if q.select.is_empty() {
            self.registry
                .resolve_fields(&q.model)?
                .into_iter()
                .map(|(_, col)| self.dialect.quote_ident(&col))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            q.select
                .iter()
                .map(|f| self.resolve_column(&q.model, f))
                .collect::<OrmResult<Vec<_>>>()?
                .join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {table}");

        if let Some(condition) = &q.r#where {
            let mut placeholder_index = 1usize;
            let clause = self.compile_condition(&q.model, condition, &mut args, &mut placeholder_index)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !q.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.compile_order_by(&q.model, &q.order_by)?);
        }

        let (limit, offset) = self.effective_pagination(q.limit, q.offset);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(Compiled { sql, args })
    }

    /// Applies the "large sentinel LIMIT when only OFFSET is set" rule for
    /// dialects that require one (see §4.3).
    fn effective_pagination(&self, limit: Option<i64>, offset: Option<i64>) -> (Option<i64>, Option<i64>) {
        if limit.is_none() && offset.is_some() && self.dialect.requires_limit_for_offset() {
            return (Some(self.dialect.unbounded_limit_sentinel()), offset);
        }
        (limit, offset)
    }

    fn compile_order_by(&self, model: &str, terms: &[OrderTerm]) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(terms.len());
        for term in terms {
            let column = self.resolve_column(model, &term.field)?;
            let dir = match term.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            let nulls = self.dialect.nulls_ordering(
                term.direction == Direction::Desc,
                term.nulls_first.map(|nulls_first| crate::dialect::NullsOrdering { nulls_first }),
            );
            parts.push(format!("{column} {dir}{nulls}"));
        }
        Ok(parts.join(", "))
    }

    fn compile_insert(&self, q: &crate::ir::InsertQuery) -> OrmResult<Compiled> {
        let table = self.resolve_table(&q.model)?;
        if q.data.is_empty() {
            return Err(OrmError::invalid_query(format!(
                "insert on {} has no data",
                q.model
            )));
        }

        let mut columns = Vec::with_capacity(q.data.len());
        let mut placeholders = Vec::with_capacity(q.data.len());
        let mut args = Vec::with_capacity(q.data.len());
        for (idx, (field, value)) in q.data.iter().enumerate() {
            columns.push(self.resolve_column(&q.model, field)?);
            placeholders.push(self.dialect.placeholder(idx + 1));
            args.push(value.clone());
        }

        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        if self.dialect.supports_returning() {
            let schema = self.registry.get(&q.model)?;
            let pk_fields = schema.primary_key_fields();
            if let Some(pk_field) = pk_fields.first() {
                let pk_column = self.resolve_column(&q.model, pk_field)?;
                sql.push_str(&format!(" RETURNING {pk_column}"));
            }
        }

        Ok(Compiled { sql, args })
    }

    fn compile_update(&self, q: &crate::ir::UpdateQuery) -> OrmResult<Compiled> {
        reject_unscoped(&q.r#where, &q.model, "update")?;
        let table = self.resolve_table(&q.model)?;
        if q.data.is_empty() {
            return Err(OrmError::invalid_query(format!(
                "update on {} has no data",
                q.model
            )));
        }

        let mut args = Vec::new();
        let mut placeholder_index = 1usize;
        let mut set_parts = Vec::with_capacity(q.data.len());
        for (field, value) in &q.data {
            let column = self.resolve_column(&q.model, field)?;
            let placeholder = self.dialect.placeholder(placeholder_index);
            placeholder_index += 1;
            set_parts.push(format!("{column} = {placeholder}"));
            args.push(value.clone());
        }

        let where_clause = self.compile_condition(&q.model, &q.r#where, &mut args, &mut placeholder_index)?;

        Ok(Compiled {
            sql: format!(
                "UPDATE {table} SET {} WHERE {where_clause}",
                set_parts.join(", ")
            ),
            args,
        })
    }

    fn compile_delete(&self, q: &crate::ir::DeleteQuery) -> OrmResult<Compiled> {
        reject_unscoped(&q.r#where, &q.model, "delete")?;
        let table = self.resolve_table(&q.model)?;
        let mut args = Vec::new();
        let mut placeholder_index = 1usize;
        let where_clause = self.compile_condition(&q.model, &q.r#where, &mut args, &mut placeholder_index)?;
        Ok(Compiled {
            sql: format!("DELETE FROM {table} WHERE {where_clause}"),
            args,
        })
    }

    fn compile_condition(
        &self,
        model: &str,
        condition: &Condition,
        args: &mut Vec<Value>,
        placeholder_index: &mut usize,
    ) -> OrmResult<String> {
        match condition {
            Condition::And(items) => self.compile_conjunction(model, items, "AND", args, placeholder_index),
            Condition::Or(items) => self.compile_conjunction(model, items, "OR", args, placeholder_index),
            Condition::Not(inner) => {
                let clause = self.compile_condition(model, inner, args, placeholder_index)?;
                Ok(format!("NOT ({clause})"))
            }
            Condition::Leaf { field, op, value } => {
                self.compile_leaf(model, field, *op, value, args, placeholder_index)
            }
        }
    }

    fn compile_conjunction(
        &self,
        model: &str,
        items: &[Condition],
        joiner: &str,
        args: &mut Vec<Value>,
        placeholder_index: &mut usize,
    ) -> OrmResult<String> {
        if items.is_empty() {
            // An empty AND/OR carries no predicate; callers that mean
            // "no condition at all" should reject this earlier via
            // `reject_unscoped`. Within a larger tree, treat it as a
            // trivially true conjunct so composition stays associative.
            return Ok("1=1".to_string());
        }
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.compile_condition(model, item, args, placeholder_index)?);
        }
        Ok(format!("({})", parts.join(&format!(" {joiner} "))))
    }

    fn compile_leaf(
        &self,
        model: &str,
        field: &str,
        op: Op,
        value: &ConditionValue,
        args: &mut Vec<Value>,
        placeholder_index: &mut usize,
    ) -> OrmResult<String> {
        let column = self.resolve_column(model, field)?;

        match op {
            Op::IsNull => return Ok(format!("{column} IS NULL")),
            Op::IsNotNull => return Ok(format!("{column} IS NOT NULL")),
            _ => {}
        }

        match op {
            Op::In | Op::NotIn => {
                let ConditionValue::List(values) = value else {
                    return Err(OrmError::invalid_query(format!(
                        "{field}: IN/NOT IN requires a list of values"
                    )));
                };
                if values.is_empty() {
                    // Empty IN is a constant-false predicate, never a
                    // syntax error (§4.3 edge case). NOT IN on an empty
                    // list is vacuously true.
                    return Ok(if op == Op::In { "1=0".to_string() } else { "1=1".to_string() });
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for v in values {
                    placeholders.push(self.dialect.placeholder(*placeholder_index));
                    *placeholder_index += 1;
                    args.push(v.clone());
                }
                let keyword = if op == Op::In { "IN" } else { "NOT IN" };
                Ok(format!("{column} {keyword} ({})", placeholders.join(", ")))
            }
            Op::Contains | Op::StartsWith | Op::EndsWith => {
                let ConditionValue::Scalar(Value::Text(text)) = value else {
                    return Err(OrmError::invalid_query(format!(
                        "{field}: CONTAINS/STARTS_WITH/ENDS_WITH require a text value"
                    )));
                };
                let escaped = escape_like_wildcards(text);
                let pattern = match op {
                    Op::Contains => format!("%{escaped}%"),
                    Op::StartsWith => format!("{escaped}%"),
                    Op::EndsWith => format!("%{escaped}"),
                    _ => unreachable!(),
                };
                let placeholder = self.dialect.placeholder(*placeholder_index);
                *placeholder_index += 1;
                args.push(Value::Text(pattern));
                Ok(format!("{column} LIKE {placeholder} ESCAPE '\\'"))
            }
            Op::Eq | Op::NotEq | Op::Lt | Op::Lte | Op::Gt | Op::Gte | Op::Like | Op::NotLike => {
                let ConditionValue::Scalar(scalar) = value else {
                    return Err(OrmError::invalid_query(format!(
                        "{field}: comparison operator requires a scalar value"
                    )));
                };
                if scalar.is_null() {
                    return Err(OrmError::invalid_query(format!(
                        "{field}: use eq(null)/neq(null) for NULL comparisons, not {op:?}"
                    )));
                }
                let operator = match op {
                    Op::Eq => "=",
                    Op::NotEq => "!=",
                    Op::Lt => "<",
                    Op::Lte => "<=",
                    Op::Gt => ">",
                    Op::Gte => ">=",
                    Op::Like => "LIKE",
                    Op::NotLike => "NOT LIKE",
                    _ => unreachable!(),
                };
                let placeholder = self.dialect.placeholder(*placeholder_index);
                *placeholder_index += 1;
                args.push(scalar.clone());
                Ok(format!("{column} {operator} {placeholder}"))
            }
            Op::IsNull | Op::IsNotNull => unreachable!("handled above"),
        }
    }
}

/// Condition trees with zero leaves (e.g. `And(vec![])`, or absent
/// entirely) signal an unscoped mutation and must never reach SQL
/// generation for UPDATE/DELETE.
fn reject_unscoped(condition: &Condition, model: &str, operation: &str) -> OrmResult<()> {
    if condition_is_empty(condition) {
        return Err(OrmError::unscoped_mutation(model, operation));
    }
    Ok(())
}

fn condition_is_empty(condition: &Condition) -> bool {
    match condition {
        Condition::Leaf { .. } => false,
        Condition::Not(inner) => condition_is_empty(inner),
        Condition::And(items) | Condition::Or(items) => items.iter().all(condition_is_empty),
    }
}

fn escape_like_wildcards(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Backend;
    use crate::ir::{Condition, DeleteQuery, InsertQuery, SelectQuery, UpdateQuery};
    use qore_core::schema::{Field, FieldType};
    use qore_core::{Schema, SchemaRegistry};
    use std::collections::BTreeMap;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register(
                Schema::new("User")
                    .field(Field::new("id", FieldType::Int32).auto_increment())
                    .field(Field::new("email", FieldType::String).unique())
                    .field(Field::new("bio", FieldType::String).nullable()),
            )
            .unwrap();
        registry
    }

    #[test]
    fn compiles_select_with_where_and_limit() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Select(SelectQuery {
            model: "User".into(),
            select: vec![],
            r#where: Some(Condition::eq("email", Value::Text("a@x".into()))),
            order_by: vec![],
            limit: Some(10),
            offset: None,
            includes: vec![],
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("WHERE (\"email\" = $1)"));
        assert!(compiled.sql.contains("LIMIT 10"));
        assert_eq!(compiled.args, vec![Value::Text("a@x".into())]);
    }

    #[test]
    fn empty_in_compiles_to_constant_false() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Select(SelectQuery {
            model: "User".into(),
            select: vec![],
            r#where: Some(Condition::in_list("id", vec![])),
            order_by: vec![],
            limit: None,
            offset: None,
            includes: vec![],
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("1=0"));
    }

    #[test]
    fn null_eq_compiles_to_is_null() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Select(SelectQuery {
            model: "User".into(),
            select: vec![],
            r#where: Some(Condition::eq("bio", Value::Null)),
            order_by: vec![],
            limit: None,
            offset: None,
            includes: vec![],
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("IS NULL"));
        assert!(compiled.args.is_empty());
    }

    #[test]
    fn update_without_where_is_rejected() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let mut data = BTreeMap::new();
        data.insert("email".to_string(), Value::Text("z@x".into()));
        let query = Query::Update(UpdateQuery {
            model: "User".into(),
            data,
            r#where: Condition::And(vec![]),
        });
        assert!(matches!(
            compiler.compile(&query),
            Err(OrmError::UnscopedMutation { .. })
        ));
    }

    #[test]
    fn delete_without_where_is_rejected() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Delete(DeleteQuery {
            model: "User".into(),
            r#where: Condition::Or(vec![]),
        });
        assert!(matches!(
            compiler.compile(&query),
            Err(OrmError::UnscopedMutation { .. })
        ));
    }

    #[test]
    fn insert_appends_returning_when_dialect_supports_it() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let mut data = BTreeMap::new();
        data.insert("email".to_string(), Value::Text("a@x".into()));
        let query = Query::Insert(InsertQuery {
            model: "User".into(),
            data,
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("RETURNING \"id\""));
    }

    #[test]
    fn mysql_insert_has_no_returning() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::MySql.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let mut data = BTreeMap::new();
        data.insert("email".to_string(), Value::Text("a@x".into()));
        let query = Query::Insert(InsertQuery {
            model: "User".into(),
            data,
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(!compiled.sql.contains("RETURNING"));
    }

    #[test]
    fn contains_compiles_to_like_with_escaped_wildcards() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::Postgres.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Select(SelectQuery {
            model: "User".into(),
            select: vec![],
            r#where: Some(Condition::Leaf {
                field: "email".into(),
                op: Op::Contains,
                value: ConditionValue::Scalar(Value::Text("50%_off".into())),
            }),
            order_by: vec![],
            limit: None,
            offset: None,
            includes: vec![],
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("LIKE"));
        assert_eq!(compiled.args, vec![Value::Text("%50\\%\\_off%".into())]);
    }

    #[test]
    fn mysql_offset_without_limit_gets_sentinel_limit() {
        let reg = registry();
        let snap = reg.snapshot();
        let dialect = Backend::MySql.dialect();
        let compiler = Compiler::new(dialect, &snap);
        let query = Query::Select(SelectQuery {
            model: "User".into(),
            select: vec![],
            r#where: None,
            order_by: vec![],
            limit: None,
            offset: Some(20),
            includes: vec![],
        });
        let compiled = compiler.compile(&query).unwrap();
        assert!(compiled.sql.contains("LIMIT"));
        assert!(compiled.sql.contains("OFFSET 20"));
    }
}
