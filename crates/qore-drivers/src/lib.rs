// SPDX-License-Identifier: Apache-2.0

//! Driver abstraction plus concrete sqlx-backed Postgres/MySQL/SQLite
//! implementations, connection URI parsing, native-error classification,
//! and the transaction coordinator that layers query-IR compilation on
//! top of a driver-level transaction.

pub mod classify;
pub mod coordinator;
pub mod factory;
pub mod introspect;
pub mod mysql;
pub mod postgres;
pub mod rowconv;
pub mod sqlite;
pub mod traits;
pub mod uri;

pub use coordinator::{transaction, TransactionHandle, TransactionModelQuery};
pub use factory::{connect, register, DriverFactory};
pub use introspect::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use traits::{Driver, Transaction};
pub use uri::{parse, ConnectionTarget};
