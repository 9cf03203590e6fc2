// SPDX-License-Identifier: Apache-2.0

//! Per-backend capability objects: identifier quoting, placeholder style,
//! literal formatting, and type mapping. One [`Dialect`] value per backend;
//! the compiler never special-cases a backend name directly, it only calls
//! through this object.

use qore_core::schema::FieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    MySql,
    Sqlite,
}

impl Backend {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Backend::Postgres),
            "mysql" | "mariadb" => Some(Backend::MySql),
            "sqlite" | "file" => Some(Backend::Sqlite),
            _ => None,
        }
    }

    pub fn dialect(self) -> Dialect {
        Dialect { backend: self }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NullsOrdering {
    pub nulls_first: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub backend: Backend,
}

impl Dialect {
    /// Quotes an identifier in the backend's native style.
    pub fn quote_ident(&self, name: &str) -> String {
        match self.backend {
            Backend::Postgres | Backend::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Backend::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// The placeholder for the `index`th bound parameter (1-based).
    pub fn placeholder(&self, index: usize) -> String {
        match self.backend {
            Backend::Postgres => format!("${index}"),
            Backend::MySql | Backend::Sqlite => "?".to_string(),
        }
    }

    pub fn bool_literal(&self, value: bool) -> &'static str {
        match self.backend {
            Backend::Postgres => if value { "TRUE" } else { "FALSE" },
            Backend::MySql | Backend::Sqlite => if value { "1" } else { "0" },
        }
    }

    /// Emits a `NULLS FIRST`/`NULLS LAST` clause where the backend supports
    /// it explicitly, or an empty string where ordering follows the
    /// backend's implicit default (MySQL/SQLite: NULLs sort lowest).
    pub fn nulls_ordering(&self, descending: bool, ordering: Option<NullsOrdering>) -> String {
        match self.backend {
            Backend::Postgres => {
                let nulls_first = ordering
                    .map(|o| o.nulls_first)
                    .unwrap_or(descending);
                if nulls_first {
                    " NULLS FIRST".to_string()
                } else {
                    " NULLS LAST".to_string()
                }
            }
            Backend::MySql | Backend::Sqlite => String::new(),
        }
    }

    pub fn supports_returning(&self) -> bool {
        matches!(self.backend, Backend::Postgres | Backend::Sqlite)
    }

    pub fn requires_limit_for_offset(&self) -> bool {
        matches!(self.backend, Backend::MySql)
    }

    /// The sentinel limit emitted when only `offset` is set on a dialect
    /// that requires an explicit limit.
    pub fn unbounded_limit_sentinel(&self) -> i64 {
        i64::MAX
    }

    /// Maps a declared field type to the backend's column type, ignoring
    /// auto-increment (handled separately by [`auto_increment_clause`]).
    pub fn map_scalar_type(&self, field_type: &FieldType) -> String {
        match (self.backend, field_type) {
            (_, FieldType::String) => "VARCHAR(255)".to_string(),
            (_, FieldType::Int32) => "INTEGER".to_string(),
            (_, FieldType::Int64) => "BIGINT".to_string(),
            (Backend::Postgres, FieldType::Float64) => "DOUBLE PRECISION".to_string(),
            (_, FieldType::Float64) => "DOUBLE".to_string(),
            (_, FieldType::Bool) => match self.backend {
                Backend::Postgres => "BOOLEAN".to_string(),
                Backend::MySql => "TINYINT(1)".to_string(),
                Backend::Sqlite => "INTEGER".to_string(),
            },
            (Backend::Postgres, FieldType::DateTime) => "TIMESTAMP".to_string(),
            (_, FieldType::DateTime) => "DATETIME".to_string(),
            (Backend::Postgres, FieldType::Decimal) => "NUMERIC".to_string(),
            (Backend::MySql, FieldType::Decimal) => "DECIMAL(65,30)".to_string(),
            (Backend::Sqlite, FieldType::Decimal) => "TEXT".to_string(),
            (Backend::Postgres, FieldType::Json) => "JSONB".to_string(),
            (Backend::MySql, FieldType::Json) => "JSON".to_string(),
            (Backend::Sqlite, FieldType::Json) => "TEXT".to_string(),
            (_, FieldType::Enum(_)) => "VARCHAR(255)".to_string(),
            (Backend::Postgres, FieldType::Array(inner)) => {
                format!("{}[]", self.map_scalar_type(inner))
            }
            (_, FieldType::Array(_)) => "TEXT".to_string(),
        }
    }

    /// The auto-increment decoration for a primary-key column declaration.
    /// Returns `(column_type_override, trailing_clause)`: Postgres replaces
    /// the type outright (`SERIAL`/`BIGSERIAL`), MySQL appends a keyword,
    /// SQLite relies on `INTEGER PRIMARY KEY` rowid aliasing.
    pub fn auto_increment_clause(&self, field_type: &FieldType) -> (Option<String>, &'static str) {
        match self.backend {
            Backend::Postgres => {
                let serial = if matches!(field_type, FieldType::Int64) {
                    "BIGSERIAL"
                } else {
                    "SERIAL"
                };
                (Some(serial.to_string()), "")
            }
            Backend::MySql => (None, " AUTO_INCREMENT"),
            Backend::Sqlite => (Some("INTEGER".to_string()), ""),
        }
    }

    /// True if `name` is a backend-internal table that introspection must
    /// exclude from diffing.
    pub fn system_table(&self, name: &str) -> bool {
        match self.backend {
            Backend::Postgres => name.starts_with("pg_") || name == "information_schema",
            Backend::MySql => matches!(name, "information_schema" | "mysql" | "performance_schema" | "sys"),
            Backend::Sqlite => name.starts_with("sqlite_"),
        }
    }

    pub fn system_index(&self, name: &str) -> bool {
        match self.backend {
            Backend::Sqlite => name.starts_with("sqlite_autoindex_"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_per_backend() {
        assert_eq!(Backend::Postgres.dialect().quote_ident("user"), "\"user\"");
        assert_eq!(Backend::MySql.dialect().quote_ident("user"), "`user`");
    }

    #[test]
    fn placeholders_differ() {
        assert_eq!(Backend::Postgres.dialect().placeholder(3), "$3");
        assert_eq!(Backend::MySql.dialect().placeholder(3), "?");
        assert_eq!(Backend::Sqlite.dialect().placeholder(3), "?");
    }

    #[test]
    fn only_postgres_and_sqlite_support_returning() {
        assert!(Backend::Postgres.dialect().supports_returning());
        assert!(Backend::Sqlite.dialect().supports_returning());
        assert!(!Backend::MySql.dialect().supports_returning());
    }

    #[test]
    fn mysql_requires_limit_for_offset() {
        assert!(Backend::MySql.dialect().requires_limit_for_offset());
        assert!(!Backend::Postgres.dialect().requires_limit_for_offset());
    }
}
