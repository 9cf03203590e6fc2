// SPDX-License-Identifier: Apache-2.0

//! Re-exports [`qore_core::Sensitive`] at the facade's top level. It lives
//! in `qore-core` rather than here because [`qore_drivers`]'s connection-URI
//! parser wraps the parsed password in it before any driver ever sees it,
//! and a driver crate can't depend on this facade crate.

pub use qore_core::Sensitive;
