use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by the record store and the session cache regardless of the backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context for the failed operation.
        message: String,
        /// Backend error that caused the failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend refused the operation because it is switched off.
    #[error("storage offline: {0}")]
    Offline(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
