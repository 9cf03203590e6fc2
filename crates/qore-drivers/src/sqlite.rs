// SPDX-License-Identifier: Apache-2.0

//! SQLite driver. Introspection reads `sqlite_master` and the
//! `pragma_table_info`/`pragma_foreign_key_list` table-valued functions
//! instead of an `information_schema`; everything else follows the same
//! pinned-connection transaction shape as the other two backends.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;
use tokio::sync::Mutex;

use qore_core::value::{ExecResult, Row, Value};
use qore_core::{OrmError, OrmResult};
use qore_sql::{Backend, Dialect};

use crate::classify::classify;
use crate::introspect::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
use crate::rowconv::convert_sqlite_row;
use crate::traits::{Driver, Transaction};
use crate::uri::ConnectionTarget;

pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    pub async fn connect(target: &ConnectionTarget, model_hint: &str) -> OrmResult<Self> {
        let path = target.file_path.as_deref().unwrap_or(":memory:");
        let conn_str = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(if path == ":memory:" { 1 } else { 5 })
            .connect(&conn_str)
            .await
            .map_err(|e| classify(Backend::Sqlite, model_hint, e))?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| classify(Backend::Sqlite, model_hint, e))?;
        Ok(Self { pool })
    }

    fn bind_args<'q>(
        mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        args: &'q [Value],
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        for arg in args {
            query = bind_one(query, arg);
        }
        query
    }
}

fn bind_one<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Json(j) => query.bind(j.to_string()),
        Value::Array(_) => query.bind(serde_json::to_string(value).unwrap_or_default()),
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Backend::Sqlite.dialect()
    }

    async fn ping(&self) -> OrmResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(())
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(rows.iter().map(convert_sqlite_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(row.as_ref().map(convert_sqlite_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let is_returning = sql.to_ascii_uppercase().contains("RETURNING");
        if is_returning {
            let query = SqliteDriver::bind_args(sqlx::query(sql), args);
            let row = query
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(Backend::Sqlite, "", e))?;
            let last_insert_id = row
                .as_ref()
                .and_then(|r| {
                    use sqlx::Row as _;
                    r.try_get::<i64, _>(0).ok()
                })
                .map(Value::Int);
            return Ok(ExecResult {
                rows_affected: last_insert_id.is_some() as u64,
                last_insert_id,
            });
        }
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(Value::Int(result.last_insert_rowid())).filter(|_| result.rows_affected() > 0),
        })
    }

    async fn begin(&self) -> OrmResult<Box<dyn Transaction>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| OrmError::connection_failed(e.to_string()))?;
        conn.execute("BEGIN")
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(Box::new(SqliteTransaction {
            conn: Mutex::new(Some(conn)),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn introspect(&self) -> OrmResult<Vec<TableInfo>> {
        introspect_sqlite(&self.pool).await
    }

    async fn execute_ddl(&self, statements: &[String]) -> OrmResult<()> {
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(Backend::Sqlite, "", e))?;
        }
        Ok(())
    }
}

struct SqliteTransaction {
    conn: Mutex<Option<PoolConnection<Sqlite>>>,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(rows.iter().map(convert_sqlite_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(row.as_ref().map(convert_sqlite_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let is_returning = sql.to_ascii_uppercase().contains("RETURNING");
        if is_returning {
            let query = SqliteDriver::bind_args(sqlx::query(sql), args);
            let row = query
                .fetch_optional(&mut **conn)
                .await
                .map_err(|e| classify(Backend::Sqlite, "", e))?;
            let last_insert_id = row
                .as_ref()
                .and_then(|r| {
                    use sqlx::Row as _;
                    r.try_get::<i64, _>(0).ok()
                })
                .map(Value::Int);
            return Ok(ExecResult {
                rows_affected: last_insert_id.is_some() as u64,
                last_insert_id,
            });
        }
        let query = SqliteDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(Value::Int(result.last_insert_rowid())).filter(|_| result.rows_affected() > 0),
        })
    }

    async fn savepoint(&self, name: &str) -> OrmResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        sqlx::query(&format!("SAVEPOINT {}", quote_savepoint(name)))
            .execute(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(())
    }

    async fn rollback_to(&self, name: &str) -> OrmResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", quote_savepoint(name)))
            .execute(&mut **conn)
            .await
            .map_err(|_| OrmError::SavepointNotFound { name: name.to_string() })?;
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> OrmResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        sqlx::query(&format!("RELEASE SAVEPOINT {}", quote_savepoint(name)))
            .execute(&mut **conn)
            .await
            .map_err(|_| OrmError::SavepointNotFound { name: name.to_string() })?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        let mut guard = self.conn.lock().await;
        let mut conn = guard
            .take()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        let mut guard = self.conn.lock().await;
        let mut conn = guard
            .take()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(Backend::Sqlite, "", e))?;
        Ok(())
    }
}

fn quote_savepoint(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn introspect_sqlite(pool: &SqlitePool) -> OrmResult<Vec<TableInfo>> {
    let dialect = Backend::Sqlite.dialect();
    let table_names: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Sqlite, "", e))?;

    let mut tables = Vec::new();
    for (name,) in table_names {
        if dialect.system_table(&name) {
            continue;
        }
        tables.push(describe_sqlite_table(pool, &name).await?);
    }
    Ok(tables)
}

async fn describe_sqlite_table(pool: &SqlitePool, table: &str) -> OrmResult<TableInfo> {
    // `pragma_table_info` is a read-only table-valued function; the table
    // name is interpolated (it's sourced from sqlite_master, never from
    // user input) since PRAGMA calls don't accept bound parameters.
    let column_rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(&format!(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info('{}')",
        table.replace('\'', "''")
    ))
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Sqlite, "", e))?;

    let mut primary_key = Vec::new();
    let mut columns = Vec::new();
    for (name, data_type, not_null, default, pk) in &column_rows {
        if *pk > 0 {
            primary_key.push(name.clone());
        }
        columns.push(ColumnInfo {
            name: name.clone(),
            data_type: data_type.clone(),
            nullable: *not_null == 0,
            default: default.clone(),
            auto_increment: *pk > 0 && data_type.eq_ignore_ascii_case("integer"),
        });
    }

    let fk_rows: Vec<(String, String, String)> = sqlx::query_as(&format!(
        "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list('{}')",
        table.replace('\'', "''")
    ))
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    let foreign_keys = fk_rows
        .into_iter()
        .map(|(column, referenced_table, referenced_column)| ForeignKeyInfo {
            column,
            referenced_table,
            referenced_column,
        })
        .collect();

    let index_list: Vec<(String, i64, String)> = sqlx::query_as(&format!(
        "SELECT name, \"unique\", origin FROM pragma_index_list('{}')",
        table.replace('\'', "''")
    ))
    .fetch_all(pool)
    .await
    .unwrap_or_default();

    let mut indexes = Vec::new();
    for (index_name, unique, origin) in index_list {
        if origin == "pk" || Backend::Sqlite.dialect().system_index(&index_name) {
            continue;
        }
        let index_columns: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT name FROM pragma_index_info('{}')",
            index_name.replace('\'', "''")
        ))
        .fetch_all(pool)
        .await
        .unwrap_or_default();
        indexes.push(IndexInfo {
            name: index_name,
            columns: index_columns.into_iter().map(|(c,)| c).collect(),
            unique: unique != 0,
        });
    }

    Ok(TableInfo {
        name: table.to_string(),
        columns,
        primary_key,
        indexes,
        foreign_keys,
    })
}
