// SPDX-License-Identifier: Apache-2.0

//! Shared schema model, naming rules, field hydration, and error taxonomy
//! for the ORM core. Every other crate in the workspace depends on this one
//! and none of its types depend on a specific SQL backend.

pub mod error;
pub mod inflector;
pub mod mapper;
pub mod registry;
pub mod schema;
pub mod sensitive;
pub mod value;

pub use error::{OrmError, OrmResult};
pub use mapper::FieldMapper;
pub use registry::{RegistrySnapshot, SchemaRegistry};
pub use schema::{
    DefaultValue, Field, FieldType, Index, RefAction, Relation, RelationKind, Schema,
};
pub use sensitive::Sensitive;
pub use value::{ExecResult, Row, Value};
