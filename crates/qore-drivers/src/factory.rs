// SPDX-License-Identifier: Apache-2.0

//! Process-wide driver registry: maps a URI scheme to the async factory
//! that opens a [`Driver`] for it. Lazily initialized with the three
//! baseline backends; [`register`] lets a host application plug in another
//! scheme (e.g. a non-SQL backend, per the abstraction's design notes)
//! without touching this crate.
//!
//! Re-registering the same scheme with the same `factory_id` is a no-op;
//! registering a different factory under an already-claimed scheme is an
//! error, so a scheme's factory never silently changes out from under a
//! caller that already depends on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::BoxFuture;

use qore_core::{OrmError, OrmResult};

use crate::mysql::MySqlDriver;
use crate::postgres::PostgresDriver;
use crate::sqlite::SqliteDriver;
use crate::traits::Driver;
use crate::uri::{self, ConnectionTarget};

pub type DriverFactory =
    Arc<dyn Fn(ConnectionTarget) -> BoxFuture<'static, OrmResult<Arc<dyn Driver>>> + Send + Sync>;

struct Entry {
    factory_id: &'static str,
    factory: DriverFactory,
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Entry>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Entry>> {
    REGISTRY.get_or_init(|| Mutex::new(builtin_entries()))
}

fn builtin_entries() -> HashMap<String, Entry> {
    let mut map = HashMap::new();
    let postgres: DriverFactory = Arc::new(|target: ConnectionTarget| {
        Box::pin(async move {
            let driver = PostgresDriver::connect(&target, "").await?;
            Ok(Arc::new(driver) as Arc<dyn Driver>)
        })
    });
    for scheme in ["postgres", "postgresql"] {
        map.insert(
            scheme.to_string(),
            Entry { factory_id: "builtin:postgres", factory: postgres.clone() },
        );
    }

    let mysql: DriverFactory = Arc::new(|target: ConnectionTarget| {
        Box::pin(async move {
            let driver = MySqlDriver::connect(&target, "").await?;
            Ok(Arc::new(driver) as Arc<dyn Driver>)
        })
    });
    for scheme in ["mysql", "mariadb"] {
        map.insert(
            scheme.to_string(),
            Entry { factory_id: "builtin:mysql", factory: mysql.clone() },
        );
    }

    let sqlite: DriverFactory = Arc::new(|target: ConnectionTarget| {
        Box::pin(async move {
            let driver = SqliteDriver::connect(&target, "").await?;
            Ok(Arc::new(driver) as Arc<dyn Driver>)
        })
    });
    for scheme in ["sqlite", "file"] {
        map.insert(
            scheme.to_string(),
            Entry { factory_id: "builtin:sqlite", factory: sqlite.clone() },
        );
    }

    map
}

/// Registers a factory for `scheme`. `factory_id` identifies the factory
/// for idempotency checks — pass the same string every time a given host
/// application registers the same factory, so repeated calls (e.g. from
/// multiple `openFromURI` call sites) don't spuriously conflict.
pub fn register(scheme: &str, factory_id: &'static str, factory: DriverFactory) -> OrmResult<()> {
    let mut guard = registry().lock().expect("driver registry lock poisoned");
    let scheme = scheme.to_ascii_lowercase();
    match guard.get(&scheme) {
        Some(existing) if existing.factory_id == factory_id => Ok(()),
        Some(existing) => Err(OrmError::invalid_query(format!(
            "scheme {scheme} is already registered to {} (attempted to register {factory_id})",
            existing.factory_id
        ))),
        None => {
            guard.insert(scheme, Entry { factory_id, factory });
            Ok(())
        }
    }
}

/// Opens a connection for `uri`, dispatching to whichever factory owns its
/// scheme. Built-in schemes resolve to the bundled Postgres/MySQL/SQLite
/// drivers unless a host application has overridden them via [`register`].
pub async fn connect(raw_uri: &str) -> OrmResult<Arc<dyn Driver>> {
    let target = uri::parse(raw_uri)?;
    let scheme = scheme_of(raw_uri)?;
    let factory = {
        let guard = registry().lock().expect("driver registry lock poisoned");
        guard
            .get(&scheme)
            .map(|e| e.factory.clone())
            .ok_or_else(|| OrmError::unsupported_scheme(scheme.clone()))?
    };
    factory(target).await
}

fn scheme_of(raw_uri: &str) -> OrmResult<String> {
    let idx = raw_uri
        .find("://")
        .ok_or_else(|| OrmError::connection_failed("missing scheme in connection URI"))?;
    Ok(raw_uri[..idx].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schemes_are_preregistered() {
        let guard = registry().lock().unwrap();
        assert!(guard.contains_key("postgres"));
        assert!(guard.contains_key("mysql"));
        assert!(guard.contains_key("sqlite"));
    }

    #[test]
    fn reregistering_same_factory_id_is_idempotent() {
        let noop: DriverFactory = Arc::new(|_| Box::pin(async { Err(OrmError::connection_failed("noop")) }));
        register("customscheme", "test:noop", noop.clone()).unwrap();
        assert!(register("customscheme", "test:noop", noop).is_ok());
    }

    #[test]
    fn conflicting_factory_for_same_scheme_errors() {
        let a: DriverFactory = Arc::new(|_| Box::pin(async { Err(OrmError::connection_failed("a")) }));
        let b: DriverFactory = Arc::new(|_| Box::pin(async { Err(OrmError::connection_failed("b")) }));
        register("conflictscheme", "test:a", a).unwrap();
        assert!(register("conflictscheme", "test:b", b).is_err());
    }
}
