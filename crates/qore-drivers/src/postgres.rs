// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL driver: pool-backed, dialect-aware `Driver` implementation.
//! Transactions pin a dedicated [`sqlx::pool::PoolConnection`] from `begin`
//! to `commit`/`rollback`, issuing `BEGIN`/`COMMIT`/`ROLLBACK` over it
//! directly rather than via `sqlx::Transaction`.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::{Executor, Row as SqlxRow};
use tokio::sync::Mutex;

use qore_core::value::{ExecResult, Row, Value};
use qore_core::{OrmError, OrmResult};
use qore_sql::{Backend, Dialect};

use crate::classify::classify;
use crate::introspect::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
use crate::rowconv::convert_postgres_row;
use crate::traits::{Driver, Transaction};
use crate::uri::ConnectionTarget;

pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    pub async fn connect(target: &ConnectionTarget, model_hint: &str) -> OrmResult<Self> {
        let conn_str = build_connection_string(target);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .min_connections(0)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&conn_str)
            .await
            .map_err(|e| classify(Backend::Postgres, model_hint, e))?;
        Ok(Self { pool })
    }

    fn bind_args<'q>(
        mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        args: &'q [Value],
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        for arg in args {
            query = bind_one_pg(query, arg);
        }
        query
    }
}

fn bind_one_pg<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
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
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Backend::Postgres.dialect()
    }

    async fn ping(&self) -> OrmResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(())
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(rows.iter().map(convert_postgres_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(row.as_ref().map(convert_postgres_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let is_returning = sql.to_ascii_uppercase().contains("RETURNING");
        if is_returning {
            let query = PostgresDriver::bind_args(sqlx::query(sql), args);
            let row = query
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(Backend::Postgres, "", e))?;
            let last_insert_id = row.and_then(|r| r.try_get::<i64, _>(0).ok()).map(Value::Int);
            return Ok(ExecResult {
                rows_affected: last_insert_id.is_some() as u64,
                last_insert_id,
            });
        }
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
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
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(Box::new(PostgresTransaction {
            conn: Mutex::new(Some(conn)),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn introspect(&self) -> OrmResult<Vec<TableInfo>> {
        introspect_postgres(&self.pool).await
    }

    async fn execute_ddl(&self, statements: &[String]) -> OrmResult<()> {
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(Backend::Postgres, "", e))?;
        }
        Ok(())
    }
}

struct PostgresTransaction {
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let rows = query
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(rows.iter().map(convert_postgres_row).collect())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Option<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let row = query
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(row.as_ref().map(convert_postgres_row))
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| OrmError::transaction_aborted("transaction already finished"))?;
        let is_returning = sql.to_ascii_uppercase().contains("RETURNING");
        if is_returning {
            let query = PostgresDriver::bind_args(sqlx::query(sql), args);
            let row = query
                .fetch_optional(&mut **conn)
                .await
                .map_err(|e| classify(Backend::Postgres, "", e))?;
            let last_insert_id = row.and_then(|r| r.try_get::<i64, _>(0).ok()).map(Value::Int);
            return Ok(ExecResult {
                rows_affected: last_insert_id.is_some() as u64,
                last_insert_id,
            });
        }
        let query = PostgresDriver::bind_args(sqlx::query(sql), args);
        let result = query
            .execute(&mut **conn)
            .await
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
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
            .map_err(|e| classify(Backend::Postgres, "", e))?;
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
            .map_err(|e| classify(Backend::Postgres, "", e))?;
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
            .map_err(|e| classify(Backend::Postgres, "", e))?;
        Ok(())
    }
}

fn quote_savepoint(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn build_connection_string(target: &ConnectionTarget) -> String {
    let mut url = url::Url::parse("postgres://").unwrap();
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

async fn introspect_postgres(pool: &PgPool) -> OrmResult<Vec<TableInfo>> {
    let dialect = Backend::Postgres.dialect();
    let table_names: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename FROM pg_tables WHERE schemaname = 'public'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Postgres, "", e))?;

    let mut tables = Vec::new();
    for (name,) in table_names {
        if dialect.system_table(&name) {
            continue;
        }
        tables.push(describe_postgres_table(pool, &name).await?);
    }
    Ok(tables)
}

async fn describe_postgres_table(pool: &PgPool, table: &str) -> OrmResult<TableInfo> {
    let column_rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT column_name::text, data_type::text, is_nullable::text, column_default::text
        FROM information_schema.columns
        WHERE table_schema = 'public' AND table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Postgres, "", e))?;

    let pk_rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT a.attname::text
        FROM pg_index i
        JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
        JOIN pg_class c ON c.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE i.indisprimary AND n.nspname = 'public' AND c.relname = $1
        ORDER BY array_position(i.indkey, a.attnum)
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Postgres, "", e))?;
    let primary_key: Vec<String> = pk_rows.into_iter().map(|(name,)| name).collect();

    let fk_rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
        FROM information_schema.table_constraints AS tc
        JOIN information_schema.key_column_usage AS kcu
          ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage AS ccu
          ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public' AND tc.table_name = $1
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Postgres, "", e))?;
    let foreign_keys = fk_rows
        .into_iter()
        .map(|(column, referenced_table, referenced_column)| ForeignKeyInfo {
            column,
            referenced_table,
            referenced_column,
        })
        .collect();

    let index_rows: Vec<(String, bool, Vec<String>)> = sqlx::query_as(
        r#"
        SELECT ic.relname::text, ix.indisunique, array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum))
        FROM pg_index ix
        JOIN pg_class ic ON ic.oid = ix.indexrelid
        JOIN pg_class tc ON tc.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = tc.relnamespace
        JOIN pg_attribute a ON a.attrelid = tc.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = 'public' AND tc.relname = $1 AND NOT ix.indisprimary
        GROUP BY ic.relname, ix.indisunique
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(Backend::Postgres, "", e))?;
    let indexes = index_rows
        .into_iter()
        .map(|(name, unique, columns)| IndexInfo { name, columns, unique })
        .collect();

    let columns = column_rows
        .into_iter()
        .map(|(name, data_type, is_nullable, default)| ColumnInfo {
            auto_increment: default.as_deref().is_some_and(|d| d.contains("nextval(")),
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
