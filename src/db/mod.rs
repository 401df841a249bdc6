pub mod sqlite;
pub mod store;

pub use sqlite::*;
pub use store::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub(crate) fn invalid(field: &str, value: impl Into<String>) -> Self {
        DatabaseError::InvalidValue {
            field: field.to_string(),
            value: value.into(),
        }
    }
}
