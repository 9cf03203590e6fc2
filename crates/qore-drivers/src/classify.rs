// SPDX-License-Identifier: Apache-2.0

//! Normalizes vendor-native `sqlx::Error`s into the ORM's error taxonomy.
//! Each backend has its own integrity-constraint error codes; anything not
//! recognized becomes `BackendError` rather than leaking a vendor type.

use qore_core::OrmError;
use qore_sql::Backend;

pub fn classify(backend: Backend, model: &str, err: sqlx::Error) -> OrmError {
    let db_err = match &err {
        sqlx::Error::Database(db_err) => Some(db_err.as_ref()),
        _ => None,
    };

    let Some(db_err) = db_err else {
        return OrmError::backend(err.to_string(), None);
    };

    let code = db_err.code().map(|c| c.to_string());
    let message = db_err.message().to_string();

    match backend {
        Backend::Postgres => match code.as_deref() {
            Some("23505") => OrmError::UniqueViolation { model: model.to_string(), message },
            Some("23502") => OrmError::NotNullViolation {
                model: model.to_string(),
                field: db_err.constraint().unwrap_or_default().to_string(),
            },
            Some("23503") => OrmError::ForeignKeyViolation { model: model.to_string(), message },
            Some("23514") => OrmError::CheckViolation { model: model.to_string(), message },
            _ => OrmError::backend(message, code),
        },
        Backend::MySql => match code.as_deref() {
            Some("1062") => OrmError::UniqueViolation { model: model.to_string(), message },
            Some("1048") => OrmError::NotNullViolation { model: model.to_string(), field: String::new() },
            Some("1452") => OrmError::ForeignKeyViolation { model: model.to_string(), message },
            Some("3819") => OrmError::CheckViolation { model: model.to_string(), message },
            _ => OrmError::backend(message, code),
        },
        Backend::Sqlite => {
            if message.contains("UNIQUE constraint failed") {
                OrmError::UniqueViolation { model: model.to_string(), message }
            } else if message.contains("NOT NULL constraint failed") {
                OrmError::NotNullViolation { model: model.to_string(), field: String::new() }
            } else if message.contains("FOREIGN KEY constraint failed") {
                OrmError::ForeignKeyViolation { model: model.to_string(), message }
            } else if message.contains("CHECK constraint failed") {
                OrmError::CheckViolation { model: model.to_string(), message }
            } else {
                OrmError::backend(message, code)
            }
        }
    }
}
