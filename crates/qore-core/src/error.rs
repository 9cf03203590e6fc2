// SPDX-License-Identifier: Apache-2.0

//! Normalized error taxonomy for the ORM core.
//!
//! Every component (registry, compiler, driver, migrator, transaction
//! coordinator) surfaces one of these kinds rather than a raw vendor error,
//! so downstream tooling can pattern-match on kind instead of message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all ORM operations.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum OrmError {
    #[error("unsupported scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("not connected")]
    NotConnected,

    #[error("schema invalid: {message}")]
    SchemaInvalid { message: String },

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    #[error("field not found: {model}.{field}")]
    FieldNotFound { model: String, field: String },

    #[error("unscoped mutation on {model}: {operation} requires a where-condition")]
    UnscopedMutation { model: String, operation: String },

    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("type mismatch on {model}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        model: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("unique violation on {model}: {message}")]
    UniqueViolation { model: String, message: String },

    #[error("not-null violation on {model}.{field}")]
    NotNullViolation { model: String, field: String },

    #[error("foreign key violation on {model}: {message}")]
    ForeignKeyViolation { model: String, message: String },

    #[error("check violation on {model}: {message}")]
    CheckViolation { model: String, message: String },

    #[error("migration unsafe: {message}")]
    MigrationUnsafe { message: String },

    #[error("migration failed: {message}")]
    MigrationFailed { message: String },

    #[error("transaction aborted: {message}")]
    TransactionAborted { message: String },

    #[error("savepoint not found: {name}")]
    SavepointNotFound { name: String },

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("backend error ({code:?}): {message}")]
    BackendError {
        message: String,
        code: Option<String>,
    },
}

impl OrmError {
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: msg.into(),
        }
    }

    pub fn schema_invalid(msg: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            message: msg.into(),
        }
    }

    pub fn model_not_found(model: impl Into<String>) -> Self {
        Self::ModelNotFound { model: model.into() }
    }

    pub fn field_not_found(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            model: model.into(),
            field: field.into(),
        }
    }

    pub fn unscoped_mutation(model: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnscopedMutation {
            model: model.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: msg.into(),
        }
    }

    pub fn migration_unsafe(msg: impl Into<String>) -> Self {
        Self::MigrationUnsafe {
            message: msg.into(),
        }
    }

    pub fn migration_failed(msg: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: msg.into(),
        }
    }

    pub fn transaction_aborted(msg: impl Into<String>) -> Self {
        Self::TransactionAborted {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>, code: Option<String>) -> Self {
        Self::BackendError {
            message: msg.into(),
            code,
        }
    }

    /// The operation's model, when the error kind carries one.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::ModelNotFound { model }
            | Self::FieldNotFound { model, .. }
            | Self::UnscopedMutation { model, .. }
            | Self::TypeMismatch { model, .. }
            | Self::UniqueViolation { model, .. }
            | Self::NotNullViolation { model, .. }
            | Self::ForeignKeyViolation { model, .. }
            | Self::CheckViolation { model, .. } => Some(model),
            _ => None,
        }
    }
}

/// Result type alias for ORM operations.
pub type OrmResult<T> = Result<T, OrmError>;
