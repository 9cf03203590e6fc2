// SPDX-License-Identifier: Apache-2.0

//! Fluent query builders layered over the query IR: [`ModelQuery`] compiles
//! to a single [`Query`](qore_sql::ir::Query) variant per terminal call,
//! [`RawQuery`] passes SQL straight through. Eager loading (`include`) runs
//! as a second pass of constrained queries against the already-fetched
//! parent rows, never as a join.

use std::collections::{BTreeMap, HashMap};

use futures::future::BoxFuture;
use futures::FutureExt;

use qore_core::schema::{RelationKind, Schema};
use qore_core::value::{ExecResult, Row, Value};
use qore_core::{OrmError, OrmResult};
use qore_sql::ir::{
    Condition, DeleteQuery, Direction, Include, InsertQuery, OrderTerm, Query, SelectQuery,
    UpdateQuery,
};

use crate::Database;

/// A fluent, per-model query builder. Cheap to clone: it only accumulates
/// the pieces of a [`SelectQuery`]/[`InsertQuery`]/[`UpdateQuery`]/
/// [`DeleteQuery`] until a terminal method compiles and runs one.
#[derive(Clone)]
pub struct ModelQuery<'a> {
    db: &'a Database,
    model: String,
    select: Vec<String>,
    r#where: Option<Condition>,
    order_by: Vec<OrderTerm>,
    limit: Option<i64>,
    offset: Option<i64>,
    includes: Vec<Include>,
}

impl<'a> ModelQuery<'a> {
    pub(crate) fn new(db: &'a Database, model: impl Into<String>) -> Self {
        Self {
            db,
            model: model.into(),
            select: Vec::new(),
            r#where: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn select(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Narrows the result set. Calling this more than once ANDs the new
    /// condition onto whatever was already set, so chained `.filter()`
    /// calls compose the way chained `WHERE`s would.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.r#where = Some(match self.r#where.take() {
            Some(existing) => Condition::and(vec![existing, condition]),
            None => condition,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderTerm {
            field: field.into(),
            direction,
            nulls_first: None,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    fn select_query(&self) -> SelectQuery {
        SelectQuery {
            model: self.model.clone(),
            select: self.select.clone(),
            r#where: self.r#where.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            includes: self.includes.clone(),
        }
    }

    pub async fn find_many(&self) -> OrmResult<Vec<Row>> {
        let raw_rows = self.db.run_query(&Query::Select(self.select_query())).await?;
        let snapshot = self.db.registry_snapshot();
        let schema = snapshot.get(&self.model)?.clone();
        let mapper = self.db.mapper();

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            rows.push(mapper.hydrate(&schema, raw)?);
        }

        if !self.includes.is_empty() {
            load_includes(self.db, &schema, &mut rows, &self.includes).await?;
        }

        Ok(rows)
    }

    pub async fn find_first(&self) -> OrmResult<Option<Row>> {
        let mut narrowed = self.clone();
        narrowed.limit = Some(1);
        Ok(narrowed.find_many().await?.into_iter().next())
    }

    /// Materializes the matching rows and counts them. There is no `COUNT`
    /// variant in the query IR, so this is exactly as expensive as
    /// `find_many` — acceptable for the row volumes an embedded/edge ORM
    /// targets, but callers counting over a huge table should reach for
    /// `raw` instead.
    pub async fn count(&self) -> OrmResult<i64> {
        Ok(self.find_many().await?.len() as i64)
    }

    /// Inserts `data`, then reads the row back by primary key so the
    /// caller sees database-computed defaults (`now()`, sequence values,
    /// `DEFAULT` expressions) fully hydrated — portable across backends
    /// regardless of `RETURNING` support.
    pub async fn create(&self, data: BTreeMap<String, Value>) -> OrmResult<Row> {
        let snapshot = self.db.registry_snapshot();
        let schema = snapshot.get(&self.model)?.clone();
        drop(snapshot);

        let pk_fields = schema.primary_key_fields();
        if pk_fields.is_empty() {
            return Err(OrmError::schema_invalid(format!(
                "{}: cannot create a row on a model without a primary key",
                self.model
            )));
        }

        let insert = InsertQuery {
            model: self.model.clone(),
            data: data.clone(),
        };
        let exec = self.db.run_exec(&Query::Insert(insert)).await?;

        let mut pk_condition: Option<Condition> = None;
        for (index, field) in pk_fields.iter().enumerate() {
            let value = match data.get(*field) {
                Some(v) => v.clone(),
                None if index == 0 && exec.last_insert_id.is_some() => {
                    exec.last_insert_id.clone().unwrap()
                }
                None => {
                    return Err(OrmError::invalid_query(format!(
                        "{}: insert data is missing primary key field {field}",
                        self.model
                    )))
                }
            };
            let leaf = Condition::eq(field.to_string(), value);
            pk_condition = Some(match pk_condition.take() {
                Some(existing) => Condition::and(vec![existing, leaf]),
                None => leaf,
            });
        }

        self.db
            .model(&self.model)
            .filter(pk_condition.expect("pk_fields is non-empty"))
            .find_first()
            .await?
            .ok_or_else(|| {
                OrmError::invalid_query(format!(
                    "{}: inserted row could not be read back",
                    self.model
                ))
            })
    }

    pub async fn update_many(&self, data: BTreeMap<String, Value>) -> OrmResult<ExecResult> {
        let update = UpdateQuery {
            model: self.model.clone(),
            data,
            r#where: self.r#where.clone().unwrap_or_else(|| Condition::And(vec![])),
        };
        self.db.run_exec(&Query::Update(update)).await
    }

    pub async fn delete_many(&self) -> OrmResult<ExecResult> {
        let delete = DeleteQuery {
            model: self.model.clone(),
            r#where: self.r#where.clone().unwrap_or_else(|| Condition::And(vec![])),
        };
        self.db.run_exec(&Query::Delete(delete)).await
    }
}

/// A raw, un-mapped SQL statement bound against positional arguments.
/// Bypasses the registry and the query IR entirely — an escape hatch for
/// statements the model-space builder can't express.
pub struct RawQuery<'a> {
    db: &'a Database,
    sql: String,
    args: Vec<Value>,
}

impl<'a> RawQuery<'a> {
    pub(crate) fn new(db: &'a Database, sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            db,
            sql: sql.into(),
            args,
        }
    }

    pub async fn fetch_all(&self) -> OrmResult<Vec<Row>> {
        self.db.driver().query(&self.sql, &self.args).await
    }

    pub async fn fetch_one(&self) -> OrmResult<Option<Row>> {
        self.db.driver().query_row(&self.sql, &self.args).await
    }

    pub async fn execute(&self) -> OrmResult<ExecResult> {
        self.db.driver().exec(&self.sql, &self.args).await
    }
}

/// Loads every declared `include` against the already-hydrated parent
/// `rows`, attaching each relation's result under its relation name as
/// `Value::Json`: a single object for to-one relations, a JSON array for
/// to-many. Runs one constrained query per relation (an `IN` over the
/// distinct parent keys), never a join, then groups the results back onto
/// their parent rows in memory.
fn load_includes<'f>(
    db: &'f Database,
    schema: &'f Schema,
    rows: &'f mut [Row],
    includes: &'f [Include],
) -> BoxFuture<'f, OrmResult<()>> {
    async move {
        for include in includes {
            let relation = schema.find_relation(&include.relation_name).ok_or_else(|| {
                OrmError::invalid_query(format!(
                    "{}: no such relation {}",
                    schema.name, include.relation_name
                ))
            })?;

            if matches!(relation.kind, RelationKind::ManyToMany) {
                return Err(OrmError::invalid_query(format!(
                    "{}.{}: many-to-many relations are not eager-loadable without a join-table model",
                    schema.name, relation.name
                )));
            }

            let local_field = relation.local_fields.first().ok_or_else(|| {
                OrmError::invalid_query(format!(
                    "{}.{}: relation has no local field to join on",
                    schema.name, relation.name
                ))
            })?;
            let referenced_field = relation.referenced_fields.first().ok_or_else(|| {
                OrmError::invalid_query(format!(
                    "{}.{}: relation has no referenced field to join on",
                    schema.name, relation.name
                ))
            })?;

            let keys = distinct_keys(rows, local_field);
            let is_to_many = matches!(relation.kind, RelationKind::OneToMany);

            let mut target_query = db
                .model(&relation.target_model)
                .filter(Condition::in_list(referenced_field.clone(), keys));
            if !include.options.select.is_empty() {
                target_query = target_query.select(include.options.select.clone());
            }
            if let Some(extra) = &include.options.r#where {
                target_query = target_query.filter(extra.clone());
            }
            for term in &include.options.order_by {
                target_query = target_query.order_by(term.field.clone(), term.direction);
            }
            if let Some(limit) = include.options.limit {
                target_query = target_query.limit(limit);
            }
            if let Some(offset) = include.options.offset {
                target_query = target_query.offset(offset);
            }
            if !include.nested.is_empty() {
                for nested in &include.nested {
                    target_query = target_query.include(nested.clone());
                }
            }

            let target_rows = target_query.find_many().await?;
            let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
            for row in target_rows {
                let key = row
                    .get(referenced_field)
                    .map(value_key)
                    .unwrap_or_else(|| value_key(&Value::Null));
                grouped.entry(key).or_default().push(row);
            }

            for row in rows.iter_mut() {
                let key = row.get(local_field).map(value_key).unwrap_or_else(|| value_key(&Value::Null));
                let matches = grouped.get(&key).cloned().unwrap_or_default();
                let attached = if is_to_many {
                    Value::Json(serde_json::Value::Array(
                        matches.iter().map(|r| serde_json::to_value(&r.values).unwrap_or(serde_json::Value::Null)).collect(),
                    ))
                } else {
                    matches
                        .first()
                        .map(|r| Value::Json(serde_json::to_value(&r.values).unwrap_or(serde_json::Value::Null)))
                        .unwrap_or(Value::Null)
                };
                row.insert(relation.name.clone(), attached);
            }
        }
        Ok(())
    }
    .boxed()
}

fn distinct_keys(rows: &[Row], field: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        if let Some(value) = row.get(field) {
            if value.is_null() {
                continue;
            }
            if seen.insert(value_key(value)) {
                out.push(value.clone());
            }
        }
    }
    out
}

/// A stable, hashable stand-in for `Value` equality. `Value` can't derive
/// `Eq`/`Hash` itself (it holds an `f64` arm), so grouping join keys goes
/// through this string form instead.
fn value_key(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Int(i) => format!("i:{i}"),
        Value::Float(f) => format!("f:{f}"),
        Value::Text(s) => format!("t:{s}"),
        Value::Bytes(b) => {
            use base64::Engine;
            format!("y:{}", base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Json(j) => format!("j:{j}"),
        Value::Array(items) => format!("a:[{}]", items.iter().map(value_key).collect::<Vec<_>>().join(",")),
    }
}
