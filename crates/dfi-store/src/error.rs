use dfi_shared::{AddressError, ContentError, DatastoreError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Routing table snapshot could not be written or read.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// A stored address failed to decode.
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// A post failed validation before insert.
    #[error("Invalid post: {0}")]
    Content(#[from] ContentError),

    #[error("Lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for DatastoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DatastoreError::NotFound,
            other => DatastoreError::Backend(other.to_string()),
        }
    }
}

/// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
pub(crate) fn not_found(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
