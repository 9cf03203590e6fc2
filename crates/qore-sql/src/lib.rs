// SPDX-License-Identifier: Apache-2.0

//! Dialect capability objects and the query IR/compiler: everything that
//! turns a model-space query into backend SQL plus positional arguments,
//! without opening a single connection.

pub mod compiler;
pub mod dialect;
pub mod ir;

pub use compiler::{Compiled, Compiler};
pub use dialect::{Backend, Dialect};
