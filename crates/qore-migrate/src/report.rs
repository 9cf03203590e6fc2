// SPDX-License-Identifier: Apache-2.0

//! The migrator's return value: every statement it executed, plus an
//! operator-facing report of type mismatches it detected but never applied
//! (see the type-widening open question in the design notes).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MismatchSeverity {
    /// The declared type is equal-or-wider than the physical column; no
    /// data loss is possible if an operator applies it by hand.
    Widening,
    /// The declared type is narrower than the physical column; applying it
    /// blind could truncate or reject existing data.
    Narrowing,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeMismatch {
    pub model: String,
    pub field: String,
    pub column: String,
    pub physical_type: String,
    pub declared_type: String,
    pub severity: MismatchSeverity,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub created_tables: Vec<String>,
    pub added_columns: Vec<String>,
    pub created_indexes: Vec<String>,
    pub added_foreign_keys: Vec<String>,
    pub type_mismatches: Vec<TypeMismatch>,
    /// Every DDL statement actually executed, in execution order. Empty on
    /// a fully converged database — the idempotency property the
    /// specification requires of `syncSchemas`.
    pub executed_ddl: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.executed_ddl.is_empty()
    }
}
