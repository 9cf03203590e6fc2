// SPDX-License-Identifier: Apache-2.0

//! Transaction coordinator: wraps a driver-level [`Transaction`] with
//! query-IR compilation so callers issue model-scoped statements the same
//! way they would against the facade, plus the [`transaction`] convenience
//! that begins, invokes the closure, and commits/rolls back based on its
//! outcome — re-raising a panic after rolling back, per §4.5.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use qore_core::registry::RegistrySnapshot;
use qore_core::value::{ExecResult, Row};
use qore_core::OrmResult;
use qore_sql::ir::Query;
use qore_sql::Compiler;

use crate::traits::{Driver, Transaction};

/// A transaction bound to one dedicated connection. Once `commit` or
/// `rollback` consumes it, the handle is gone — there is no way to reuse
/// a finished transaction, matching the "terminal; handle is invalid
/// afterwards" rule in §4.5.
pub struct TransactionHandle {
    inner: Box<dyn Transaction>,
    registry: RegistrySnapshot,
    dialect: qore_sql::Dialect,
}

impl TransactionHandle {
    pub fn new(inner: Box<dyn Transaction>, registry: RegistrySnapshot, dialect: qore_sql::Dialect) -> Self {
        Self {
            inner,
            registry,
            dialect,
        }
    }

    pub fn model(&self, model: &str) -> TransactionModelQuery<'_> {
        TransactionModelQuery {
            handle: self,
            model: model.to_string(),
        }
    }

    pub async fn run(&self, query: &Query) -> OrmResult<Vec<Row>> {
        let compiler = Compiler::new(self.dialect, &self.registry);
        let compiled = compiler.compile(query)?;
        self.inner.query(&compiled.sql, &compiled.args).await
    }

    pub async fn run_exec(&self, query: &Query) -> OrmResult<ExecResult> {
        let compiler = Compiler::new(self.dialect, &self.registry);
        let compiled = compiler.compile(query)?;
        self.inner.exec(&compiled.sql, &compiled.args).await
    }

    pub async fn raw(&self, sql: &str, args: &[qore_core::value::Value]) -> OrmResult<Vec<Row>> {
        self.inner.query(sql, args).await
    }

    pub async fn savepoint(&self, name: &str) -> OrmResult<()> {
        self.inner.savepoint(name).await
    }

    pub async fn rollback_to(&self, name: &str) -> OrmResult<()> {
        self.inner.rollback_to(name).await
    }

    pub async fn release_savepoint(&self, name: &str) -> OrmResult<()> {
        self.inner.release_savepoint(name).await
    }

    pub async fn commit(self) -> OrmResult<()> {
        self.inner.commit().await
    }

    pub async fn rollback(self) -> OrmResult<()> {
        self.inner.rollback().await
    }
}

pub struct TransactionModelQuery<'a> {
    handle: &'a TransactionHandle,
    model: String,
}

impl<'a> TransactionModelQuery<'a> {
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn exec(&self, query: &Query) -> OrmResult<ExecResult> {
        self.handle.run_exec(query).await
    }

    pub async fn find_many(&self, query: &Query) -> OrmResult<Vec<Row>> {
        self.handle.run(query).await
    }
}

/// Begins a transaction on `driver`, invokes `f` with a reference to the
/// handle, then commits on `Ok` or rolls back on `Err`. A panic inside `f`
/// is caught, triggers a rollback, and is then re-thrown so the caller's
/// panic propagates unchanged.
pub async fn transaction<F, Fut, T>(driver: &dyn Driver, registry: RegistrySnapshot, f: F) -> OrmResult<T>
where
    F: FnOnce(&TransactionHandle) -> Fut,
    Fut: Future<Output = OrmResult<T>>,
{
    let inner = driver.begin().await?;
    let handle = TransactionHandle::new(inner, registry, driver.dialect());

    let result = AssertUnwindSafe(f(&handle)).catch_unwind().await;

    match result {
        Ok(Ok(value)) => {
            handle.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            handle.rollback().await.ok();
            Err(err)
        }
        Err(panic) => {
            handle.rollback().await.ok();
            std::panic::resume_unwind(panic);
        }
    }
}
