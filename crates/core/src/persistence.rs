use thiserror::Error;

/// Errors from file-backed stores.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
