//! Store connection settings.
//!
//! A relay process carries no state of its own, so joining a deployment
//! takes exactly one piece of configuration: the URL of the shared
//! database. The helpers here slice that URL so callers can address
//! sibling databases on the same server (the `postgres` maintenance
//! database for bootstrap, per-test scratch databases) without
//! hand-assembling connection strings and losing query parameters such
//! as the TLS mode along the way.

use std::env;

/// Database configuration: one PostgreSQL URL.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
}

impl DbConfig {
    /// Used when nothing else names a database.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/relay";

    /// Read the URL from `RELAY_DATABASE_URL`, falling back to
    /// [`Self::DEFAULT_URL`].
    pub fn from_env() -> Self {
        let database_url =
            env::var("RELAY_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (CLI flags, tests).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Byte span of the database name inside the URL: the segment after
    /// the first path slash past the `://` authority, ending at the
    /// query string if one is present.
    fn database_name_span(&self) -> Option<(usize, usize)> {
        let authority = self.database_url.find("://").map(|i| i + 3).unwrap_or(0);
        let slash = self.database_url[authority..].find('/')? + authority;
        let start = slash + 1;
        let end = self.database_url[start..]
            .find('?')
            .map_or(self.database_url.len(), |i| start + i);
        Some((start, end))
    }

    /// The database name this URL points at, if it names one.
    pub fn database_name(&self) -> Option<&str> {
        let (start, end) = self.database_name_span()?;
        let name = &self.database_url[start..end];
        (!name.is_empty()).then_some(name)
    }

    /// The same server, pointed at a different database.
    ///
    /// Query parameters carry over, so a derived connection negotiates
    /// TLS and the rest exactly like the original. A URL with no path
    /// component gets one appended.
    pub fn with_database(&self, name: &str) -> Self {
        match self.database_name_span() {
            Some((start, end)) => Self::new(format!(
                "{}{}{}",
                &self.database_url[..start],
                name,
                &self.database_url[end..]
            )),
            None => Self::new(format!("{}/{name}", self.database_url)),
        }
    }

    /// URL of the server's `postgres` maintenance database, for
    /// `CREATE DATABASE` / `DROP DATABASE` statements.
    pub fn maintenance_url(&self) -> String {
        self.with_database("postgres").database_url
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
