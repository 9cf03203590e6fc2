// SPDX-License-Identifier: Apache-2.0

//! MySQL driver. Shares the Postgres driver's pinned-connection transaction
//! shape; differs in dialect (no RETURNING, `AUTO_INCREMENT` reported via
//! `last_insert_id()`) and introspection source (`information_schema`).

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::Executor;
use tokio::sync::Mutex;

use qore_core::value::{ExecResult, Row, Value};
use qore_core::{OrmError, OrmResult};
use qore_sql::{Backend, Dialect};

use crate::classify::classify;
use crate::introspect::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
use crate::rowconv::convert_mysql_row;
use crate::traits::{Driver, Transaction};
use crate::uri::ConnectionTarget;

pub struct MySqlDriver {
    pool: MySqlPool,
    database: String,
}

impl MySqlDriver {
    pub async fn connect(target: &ConnectionTarget, model_hint: &str) -> OrmResult<Self> {
        let conn_str = build_connection_string(target);
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .min_connections(0)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&conn_str)
            .await
            .map_err(|e| classify(Backend::MySql, model_hint, e))?;
        Ok(Self {
            pool,
            database: target.database.clone(),
        })
    }

    fn bind_args<'q>(
        mut query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
        args: &'q [Value],
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        for arg in args {
            query = bind_one(query, arg);
        }
        query
    }
}

fn bind_one<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Json(j) => query.bind(j.clone()),
        Value::Array(_) => query.bind(serde_json::to_value(value).unwrap_or(serde_json::Value::Null)),
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        Backend::MySql.dialect()
    }

    async fn ping(&self) -> OrmResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(())
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(rows.iter().map(convert_mysql_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(row.as_ref().map(convert_mysql_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        let last_insert_id = if result.last_insert_id() > 0 {
            Some(Value::Int(result.last_insert_id() as i64))
        } else {
            None
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    async fn begin(&self) -> OrmResult<Box<dyn Transaction>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| OrmError::connection_failed(e.to_string()))?;
        conn.execute("START TRANSACTION")
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(Box::new(MySqlTransaction {
            conn: Mutex::new(Some(conn)),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn introspect(&self) -> OrmResult<Vec<TableInfo>> {
        introspect_mysql(&self.pool, &self.database).await
    }

    async fn execute_ddl(&self, statements: &[String]) -> OrmResult<()> {
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(Backend::MySql, "", e))?;
        }
        Ok(())
    }
}

struct MySqlTransaction {
    conn: Mutex<Option<PoolConnection<MySql>>>,
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(rows.iter().map(convert_mysql_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(row.as_ref().map(convert_mysql_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = MySqlDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&mut **conn)
            .await
            .map_err(|e| classify(Backend::MySql, "", e))?;
        let last_insert_id = if result.last_insert_id() > 0 {
            Some(Value::Int(result.last_insert_id() as i64))
        } else {
            None
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id,
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
            .map_err(|e| classify(Backend::MySql, "", e))?;
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
            .map_err(|e| classify(Backend::MySql, "", e))?;
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
            .map_err(|e| classify(Backend::MySql, "", e))?;
        Ok(())
    }
}

fn quote_savepoint(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn build_connection_string(target: &ConnectionTarget) -> String {
    let mut url = url::Url::parse("mysql://").unwrap();
    let _ = url.set_host(target.host.as_deref());
    let _ = url.set_port(target.port);
    if let Some(user) = &target.username {
        let _ = url.set_username(user);
    }
    if let Some(password) = &target.password {
        let _ = url.set_password(Some(password.expose().as_str()));
    }
    url.set_path(&format!("/{}", target.database));
    url.to_string()
}

async fn introspect_mysql(pool: &MySqlPool, database: &str) -> OrmResult<Vec<TableInfo>> {
    let dialect = Backend::MySql.dialect();
    let table_names: Vec<(String,)> = sqlx::query_as(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = ?",
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::MySql, "", e))?;

    let mut tables = Vec::new();
    for (name,) in table_names {
        if dialect.system_table(&name) {
            continue;
        }
        tables.push(describe_mysql_table(pool, database, &name).await?);
    }
    Ok(tables)
}

async fn describe_mysql_table(pool: &MySqlPool, database: &str, table: &str) -> OrmResult<TableInfo> {
    let column_rows: Vec<(String, String, String, Option<String>, String)> = sqlx::query_as(
        r#"
        SELECT column_name, data_type, is_nullable, column_default, extra
        FROM information_schema.columns
        WHERE table_schema = ? AND table_name = ?
        ORDER BY ordinal_position
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::MySql, "", e))?;

    let pk_rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT column_name FROM information_schema.key_column_usage
        WHERE table_schema = ? AND table_name = ? AND constraint_name = 'PRIMARY'
        ORDER BY ordinal_position
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::MySql, "", e))?;
    let primary_key: Vec<String> = pk_rows.into_iter().map(|(name,)| name).collect();

    let fk_rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT column_name, referenced_table_name, referenced_column_name
        FROM information_schema.key_column_usage
        WHERE table_schema = ? AND table_name = ? AND referenced_table_name IS NOT NULL
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::MySql, "", e))?;
    let foreign_keys = fk_rows
        .into_iter()
        .map(|(column, referenced_table, referenced_column)| ForeignKeyInfo {
            column,
            referenced_table,
            referenced_column,
        })
        .collect();

    let index_rows: Vec<(String, i64, String)> = sqlx::query_as(
        r#"
        SELECT index_name, non_unique, column_name
        FROM information_schema.statistics
        WHERE table_schema = ? AND table_name = ? AND index_name != 'PRIMARY'
        ORDER BY index_name, seq_in_index
        "#,
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    let mut by_name: std::collections::BTreeMap<String, (bool, Vec<String>)> = Default::default();
    for (key_name, non_unique, column_name) in index_rows {
        let entry = by_name.entry(key_name).or_insert((non_unique == 0, Vec::new()));
        entry.1.push(column_name);
    }
    let indexes = by_name
        .into_iter()
        .map(|(name, (unique, columns))| IndexInfo { name, columns, unique })
        .collect();

    let columns = column_rows
        .into_iter()
        .map(|(name, data_type, is_nullable, default, extra)| ColumnInfo {
            auto_increment: extra.contains("auto_increment"),
            name,
            data_type,
            nullable: is_nullable == "YES",
            default,
        })
        .collect();

    Ok(TableInfo {
        name: table.to_string(),
        columns,
        primary_key,
        indexes,
        foreign_keys,
    })
}
