use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typed options of a stage, built from an opaque JSON value.
pub trait StageOptions: Sized + Send + Sync + 'static {
    /// Parse `value`. A `null` value yields the defaults.
    fn from_value(value: &Value) -> Result<Self, serde_json::Error>;

    /// Database overriding the configured one for this invocation.
    fn db(&self) -> Option<&str>;
}

/// Options shared by every repository-backed stage.
///
/// Only `db` is interpreted. Other keys are kept in `extra` and never read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DbOptions {
    #[serde(default)]
    pub db: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DbOptions {
    pub fn with_db(db: impl Into<String>) -> Self {
        Self {
            db: Some(db.into()),
            extra: Map::new(),
        }
    }
}

impl StageOptions for DbOptions {
    fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }

    fn db(&self) -> Option<&str> {
        // A blank name means "no override".
        self.db.as_deref().map(str::trim).filter(|db| !db.is_empty())
    }
}
