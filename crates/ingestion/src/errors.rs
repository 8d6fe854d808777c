//! Ingestion service error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<factweave_common::errors::AppError> for IngestionError {
    fn from(e: factweave_common::errors::AppError) -> Self {
        use factweave_common::errors::AppError;
        match e {
            AppError::IndexError { message } => IngestionError::IndexError(message),
            other => IngestionError::DatabaseError(other.to_string()),
        }
    }
}
