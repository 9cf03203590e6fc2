// SPDX-License-Identifier: Apache-2.0

//! Qore ORM: a declarative schema layer over embedded SQLite and the
//! Postgres/MySQL network backends. [`Database`] is the facade every
//! caller programs against — open a connection, register schemas,
//! reconcile them against the live backend, then read and write through
//! [`query::ModelQuery`]/[`query::RawQuery`] or an explicit transaction.

#[cfg(test)]
mod observability;
pub mod query;
pub mod sensitive;

use std::sync::Arc;

use qore_core::registry::RegistrySnapshot;
use qore_core::schema::Schema;
use qore_core::value::Value;
use qore_core::{FieldMapper, OrmResult, SchemaRegistry};
use qore_drivers::{Driver, TransactionHandle};
use qore_migrate::{MigrationReport, Migrator};
use qore_sql::ir::Query;
use qore_sql::Compiler;

pub use qore_core::{
    DefaultValue, Field, FieldType, Index, OrmError, RefAction, Relation, RelationKind,
};
pub use qore_core::value::{ExecResult, Row};
pub use qore_sql::ir::{Condition, ConditionValue, Direction, Include, IncludeOptions, Op, OrderTerm};
pub use query::{ModelQuery, RawQuery};
pub use sensitive::Sensitive;

/// An open connection to one backend plus the schema registry layered on
/// top of it. Cloning a `Database` is not supported — callers share one
/// behind an `Arc` instead, since the pool and registry underneath are
/// already `Arc`-shared and cheap to reference from multiple tasks.
pub struct Database {
    driver: Arc<dyn Driver>,
    registry: Arc<SchemaRegistry>,
    mapper: FieldMapper,
    migrator: Migrator,
}

impl Database {
    /// Opens a connection for `uri`, dispatching to whichever backend owns
    /// its scheme (built-in Postgres/MySQL/SQLite, or one registered via
    /// [`qore_drivers::register`]). The registry starts empty; call
    /// [`Database::register_schema`] for each model before querying it.
    pub async fn open_from_uri(uri: &str) -> OrmResult<Self> {
        let driver = qore_drivers::connect(uri).await?;
        let registry = Arc::new(SchemaRegistry::new());
        let migrator = Migrator::new(driver.clone(), registry.clone());
        Ok(Self {
            driver,
            registry,
            mapper: FieldMapper::new(),
            migrator,
        })
    }

    /// Alias for [`Database::open_from_uri`] matching the verb callers
    /// reach for first.
    pub async fn connect(uri: &str) -> OrmResult<Self> {
        Self::open_from_uri(uri).await
    }

    pub async fn ping(&self) -> OrmResult<()> {
        self.driver.ping().await
    }

    /// Closes the underlying pool. Consumes `self`: there is no way to
    /// issue another query through a closed `Database`.
    pub async fn close(self) -> OrmResult<()> {
        self.driver.close().await
    }

    pub fn register_schema(&self, schema: Schema) -> OrmResult<()> {
        self.registry.register(schema)
    }

    /// Drops `model`'s table and removes it from the registry. Unlike
    /// [`Database::sync_schemas`] this is explicit and immediate — there is
    /// no "converge towards a smaller schema set" behavior, only towards a
    /// larger one, matching the migrator's never-destructive-by-default
    /// design.
    pub async fn drop_model(&self, model: &str) -> OrmResult<()> {
        self.migrator.drop_model(model).await
    }

    /// Introspects the live backend, diffs it against every registered
    /// schema, and applies whatever DDL is needed to converge. Idempotent:
    /// an already-converged database executes no statements.
    pub async fn sync_schemas(&self) -> OrmResult<MigrationReport> {
        self.migrator.sync_schemas().await
    }

    pub fn model<'a>(&'a self, model: &str) -> ModelQuery<'a> {
        ModelQuery::new(self, model)
    }

    pub fn raw<'a>(&'a self, sql: impl Into<String>, args: Vec<Value>) -> RawQuery<'a> {
        RawQuery::new(self, sql, args)
    }

    /// Runs `f` inside a transaction: begins, invokes `f` with a reference
    /// to the transaction handle, commits on `Ok`, rolls back on `Err` or
    /// panic.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(&TransactionHandle) -> Fut,
        Fut: std::future::Future<Output = OrmResult<T>>,
    {
        qore_drivers::transaction(self.driver.as_ref(), self.registry.snapshot(), f).await
    }

    /// Begins a transaction the caller drives explicitly, committing or
    /// rolling back by consuming the returned handle.
    pub async fn begin(&self) -> OrmResult<TransactionHandle> {
        let inner = self.driver.begin().await?;
        Ok(TransactionHandle::new(
            inner,
            self.registry.snapshot(),
            self.driver.dialect(),
        ))
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub(crate) fn registry_snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub(crate) fn mapper(&self) -> &FieldMapper {
        &self.mapper
    }

    pub(crate) async fn run_query(&self, query: &Query) -> OrmResult<Vec<qore_core::value::Row>> {
        let snapshot = self.registry.snapshot();
        let compiled = Compiler::new(self.driver.dialect(), &snapshot).compile(query)?;
        self.driver.query(&compiled.sql, &compiled.args).await
    }

    pub(crate) async fn run_exec(&self, query: &Query) -> OrmResult<qore_core::value::ExecResult> {
        let snapshot = self.registry.snapshot();
        let compiled = Compiler::new(self.driver.dialect(), &snapshot).compile(query)?;
        self.driver.exec(&compiled.sql, &compiled.args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::schema::{Field, FieldType};

    #[tokio::test]
    async fn opens_an_in_memory_sqlite_database_and_pings_it() {
        observability::init_test_tracing();
        let db = Database::open_from_uri("sqlite://:memory:").await.unwrap();
        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn registers_a_schema_then_syncs_and_queries_it() {
        let db = Database::open_from_uri("sqlite://:memory:").await.unwrap();
        db.register_schema(
            Schema::new("User")
                .field(Field::new("id", FieldType::Int32).auto_increment())
                .field(Field::new("email", FieldType::String).unique()),
        )
        .unwrap();

        let report = db.sync_schemas().await.unwrap();
        assert!(!report.is_noop());

        let mut data = std::collections::BTreeMap::new();
        data.insert("email".to_string(), Value::Text("ada@example.com".to_string()));
        let created = db.model("User").create(data).await.unwrap();
        assert_eq!(created.get("email"), Some(&Value::Text("ada@example.com".to_string())));

        let found = db
            .model("User")
            .filter(Condition::eq("email", Value::Text("ada@example.com".to_string())))
            .find_first()
            .await
            .unwrap();
        assert!(found.is_some());

        let second_sync = db.sync_schemas().await.unwrap();
        assert!(second_sync.is_noop());
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let db = Database::open_from_uri("sqlite://:memory:").await.unwrap();
        db.register_schema(
            Schema::new("User")
                .field(Field::new("id", FieldType::Int32).auto_increment())
                .field(Field::new("email", FieldType::String).unique()),
        )
        .unwrap();
        db.sync_schemas().await.unwrap();

        let result: OrmResult<()> = db
            .transaction(|handle| async move {
                let mut data = std::collections::BTreeMap::new();
                data.insert("email".to_string(), Value::Text("rollback@example.com".to_string()));
                handle
                    .run_exec(&Query::Insert(qore_sql::ir::InsertQuery {
                        model: "User".to_string(),
                        data,
                    }))
                    .await?;
                Err(OrmError::invalid_query("force rollback"))
            })
            .await;
        assert!(result.is_err());

        let remaining = db.model("User").find_many().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let db = Database::open_from_uri("sqlite://:memory:").await.unwrap();
        db.register_schema(
            Schema::new("User")
                .field(Field::new("id", FieldType::Int32).auto_increment())
                .field(Field::new("email", FieldType::String).unique()),
        )
        .unwrap();
        db.sync_schemas().await.unwrap();

        db.transaction(|handle| async move {
            let mut data = std::collections::BTreeMap::new();
            data.insert("email".to_string(), Value::Text("commit@example.com".to_string()));
            handle
                .run_exec(&Query::Insert(qore_sql::ir::InsertQuery {
                    model: "User".to_string(),
                    data,
                }))
                .await?;
            Ok(())
        })
        .await
        .unwrap();

        let remaining = db.model("User").find_many().await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
