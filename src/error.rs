use thiserror::Error;

/// Main error type for Semlayer
#[derive(Error, Debug)]
pub enum SemlayerError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pattern/rule/hierarchy store could not be read
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored pattern could not be parsed or compiled
    #[error("Malformed pattern {id}: {reason}")]
    MalformedPattern { id: String, reason: String },

    /// A stored rule could not be parsed
    #[error("Malformed rule {name}: {reason}")]
    MalformedRule { name: String, reason: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SemlayerError {
    /// True for failures that prevent reading a snapshot at all.
    ///
    /// These are the only errors the core surfaces to callers; everything
    /// else degrades into lower confidence or skipped records.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SemlayerError::Database(_) | SemlayerError::Io(_) | SemlayerError::StoreUnavailable(_)
        )
    }
}

/// Convenient Result type using SemlayerError
pub type Result<T> = std::result::Result<T, SemlayerError>;
