// SPDX-License-Identifier: Apache-2.0

//! Driver and Transaction trait definitions: the abstraction every backend
//! (Postgres, MySQL, SQLite) implements, and that the Database Facade and
//! Transaction Coordinator program against.

use async_trait::async_trait;
use qore_core::value::{ExecResult, Row};
use qore_core::OrmResult;
use qore_sql::Dialect;

/// Opens a pool to one backend and executes compiled SQL against it. Owns
/// the [`Dialect`] for its backend so the compiler never has to special-
/// case a driver by name.
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn ping(&self) -> OrmResult<()>;

    async fn query(&self, sql: &str, args: &[qore_core::value::Value]) -> OrmResult<Vec<Row>>;

    async fn query_row(
        &self,
        sql: &str,
        args: &[qore_core::value::Value],
    ) -> OrmResult<Option<Row>>;

    async fn exec(&self, sql: &str, args: &[qore_core::value::Value]) -> OrmResult<ExecResult>;

    /// Begins a transaction on a dedicated connection pinned for its
    /// lifetime; the returned handle owns that connection until
    /// `commit`/`rollback` consumes it.
    async fn begin(&self) -> OrmResult<Box<dyn Transaction>>;

    async fn close(&self) -> OrmResult<()>;

    /// Enumerates introspectable tables, excluding backend-internal ones
    /// per [`Dialect::system_table`]. Used by the migrator.
    async fn introspect(&self) -> OrmResult<Vec<crate::introspect::TableInfo>>;

    async fn execute_ddl(&self, statements: &[String]) -> OrmResult<()>;
}

/// A transaction pinned to one connection. Every method consumes `self`
/// where the operation is terminal (`commit`/`rollback`), so the
/// connection returns to the pool exactly once and a finished transaction
/// can't be driven further.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn query(&self, sql: &str, args: &[qore_core::value::Value]) -> OrmResult<Vec<Row>>;

    async fn query_row(
        &self,
        sql: &str,
        args: &[qore_core::value::Value],
    ) -> OrmResult<Option<Row>>;

    async fn exec(&self, sql: &str, args: &[qore_core::value::Value]) -> OrmResult<ExecResult>;

    async fn savepoint(&self, name: &str) -> OrmResult<()>;

    async fn rollback_to(&self, name: &str) -> OrmResult<()>;

    async fn release_savepoint(&self, name: &str) -> OrmResult<()>;

    async fn commit(self: Box<Self>) -> OrmResult<()>;

    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}
