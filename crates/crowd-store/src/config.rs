use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Credentials presented to the store server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Database the user is defined in.
    #[serde(default = "default_auth_source")]
    pub source: String,
}

fn default_auth_source() -> String {
    "admin".into()
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            source: default_auth_source(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Parameters for reaching one database.
///
/// Resolved by the embedding application (from files, environment, etc.)
/// before any repository is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server addresses as `host:port`.
    pub addresses: Vec<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Default database name.
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["localhost:27017".into()],
            credentials: None,
            database: "crowd".into(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            addresses: vec![address.into()],
            credentials: None,
            database: database.into(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The same parameters with the database replaced by `database`, if
    /// given.
    pub fn for_database(&self, database: Option<&str>) -> Self {
        let mut resolved = self.clone();
        if let Some(db) = database {
            resolved.database = db.to_string();
        }
        resolved
    }
}

/// Store settings handed explicitly to every repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub connection: ConnectionConfig,
    /// Maximum number of documents pulled from a cursor per round trip by
    /// reads that collect their whole result (`get_all`,
    /// `get_between_keys`). Streaming reads always pull one document per
    /// request, so their consumers never cause read-ahead.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: NonZeroUsize,
}

fn default_fetch_size() -> NonZeroUsize {
    NonZeroUsize::MIN
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl StoreSettings {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            fetch_size: default_fetch_size(),
        }
    }

    pub fn with_fetch_size(mut self, fetch_size: NonZeroUsize) -> Self {
        self.fetch_size = fetch_size;
        self
    }
}
