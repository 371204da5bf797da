/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use fleetmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "alert-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A lifecycle command was rejected because the alert is not in a state
    /// the command is legal from.
    #[error("Storage: cannot {action} alert {id}: alert is {current}")]
    IllegalTransition {
        action: &'static str,
        id: String,
        current: String,
    },

    /// A write succeeded but the row could not be read back, which should be
    /// unreachable under normal conditions.
    #[error("Storage: write to {entity} succeeded but the row could not be read back")]
    WriteReadback { entity: &'static str },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (e.g. channel columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while opening or creating the database.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
