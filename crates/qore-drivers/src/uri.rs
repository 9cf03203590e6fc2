// SPDX-License-Identifier: Apache-2.0

//! Connection URI parsing: `<scheme>://[user[:password]@]host[:port]/database[?k=v]`
//! or `<scheme>:///path` / `<scheme>://:memory:` for the embedded backend.

use qore_core::{OrmError, OrmResult, Sensitive};
use qore_sql::Backend;
use url::Url;

#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub backend: Backend,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Sensitive<String>>,
    pub database: String,
    /// SQLite: a filesystem path, or `:memory:`.
    pub file_path: Option<String>,
}

const DEFAULT_PORTS: &[(Backend, u16)] = &[(Backend::Postgres, 5432), (Backend::MySql, 3306)];

pub fn parse(uri: &str) -> OrmResult<ConnectionTarget> {
    let url = Url::parse(uri).map_err(|e| OrmError::connection_failed(format!("invalid URI: {e}")))?;
    let backend = Backend::from_scheme(url.scheme())
        .ok_or_else(|| OrmError::unsupported_scheme(url.scheme().to_string()))?;

    if backend == Backend::Sqlite {
        return parse_sqlite(&url);
    }

    let host = url.host_str().filter(|h| !h.is_empty()).map(String::from);
    if host.is_none() {
        return Err(OrmError::connection_failed("missing host in connection URI"));
    }

    let port = url.port().or_else(|| {
        DEFAULT_PORTS
            .iter()
            .find(|(b, _)| *b == backend)
            .map(|(_, p)| *p)
    });

    let database = url.path().trim_start_matches('/').to_string();
    if database.is_empty() {
        return Err(OrmError::connection_failed("missing database name in connection URI"));
    }

    let username = if url.username().is_empty() {
        None
    } else {
        Some(url.username().to_string())
    };
    let password = url.password().map(|p| Sensitive::new(p.to_string()));

    Ok(ConnectionTarget {
        backend,
        host,
        port,
        username,
        password,
        database,
        file_path: None,
    })
}

fn parse_sqlite(url: &Url) -> OrmResult<ConnectionTarget> {
    // `sqlite://:memory:` parses with an empty host and a `:memory:` path
    // segment once url-decoded; `sqlite:///abs/path.db` carries the path
    // verbatim after the triple slash.
    let host = url.host_str().unwrap_or_default();
    let path = url.path();

    let file_path = if host == ":memory:" || path == "/:memory:" || path == ":memory:" {
        ":memory:".to_string()
    } else if !path.is_empty() && path != "/" {
        path.trim_start_matches('/').to_string()
    } else {
        return Err(OrmError::connection_failed("missing path in sqlite URI"));
    };

    Ok(ConnectionTarget {
        backend: Backend::Sqlite,
        host: None,
        port: None,
        username: None,
        password: None,
        database: file_path.clone(),
        file_path: Some(file_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_uri_with_default_port() {
        let target = parse("postgres://user:pw@localhost/mydb").unwrap();
        assert_eq!(target.backend, Backend::Postgres);
        assert_eq!(target.port, Some(5432));
        assert_eq!(target.database, "mydb");
        assert_eq!(target.username.as_deref(), Some("user"));
    }

    #[test]
    fn password_is_captured_but_redacted_in_debug_output() {
        let target = parse("postgres://user:pw@localhost/mydb").unwrap();
        let password = target.password.expect("password present in URI");
        assert_eq!(password.expose(), "pw");
        assert_eq!(format!("{:?}", password), "[REDACTED]");
        assert!(!format!("{:?}", target).contains("pw"));
    }

    #[test]
    fn parses_mysql_uri_with_explicit_port() {
        let target = parse("mysql://root@db:3307/app").unwrap();
        assert_eq!(target.port, Some(3307));
    }

    #[test]
    fn parses_sqlite_memory_uri() {
        let target = parse("sqlite://:memory:").unwrap();
        assert_eq!(target.file_path.as_deref(), Some(":memory:"));
    }

    #[test]
    fn parses_sqlite_file_uri() {
        let target = parse("sqlite:///var/data/app.db").unwrap();
        assert_eq!(target.file_path.as_deref(), Some("var/data/app.db"));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            parse("mongodb://localhost/db"),
            Err(OrmError::UnsupportedScheme { .. })
        ));
    }
}
