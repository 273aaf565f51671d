// src/db/error.rs
//! Error type shared by every queue and settings operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine failed; the enclosing transaction was rolled back.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected before any statement ran.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidInput(msg.into())
    }

    /// True for `SQLITE_BUSY`, i.e. another connection holds the write lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StoreError::Sql(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
        )
    }
}
