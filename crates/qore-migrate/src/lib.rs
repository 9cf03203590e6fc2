// SPDX-License-Identifier: Apache-2.0

//! The migration engine: introspects a live backend, diffs it against the
//! registered schemas, and emits the ordered DDL needed to converge them.
//! Re-running against an already-converged database is a no-op — see
//! [`report::MigrationReport::is_noop`].

pub mod ddl;
pub mod migrator;
pub mod report;

pub use migrator::Migrator;
pub use report::{MigrationReport, MismatchSeverity, TypeMismatch};
