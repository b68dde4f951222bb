//! Error types and handling
//!
//! Common error types used across the crate.

use crate::convert::ConversionError;
use crate::export::EncodingError;
use crate::recorder::channel::{RegistrationError, SessionError};
use crate::store::{BundleError, PersistenceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Session directory error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),
}

/// Error as surfaced to callers outside the process
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Registration(_) => "REGISTRATION_ERROR",
            AppError::Session(_) => "SESSION_ERROR",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::Bundle(_) => "SESSION_DIRECTORY_ERROR",
            AppError::Encoding(_) => "ENCODING_ERROR",
            AppError::Conversion(_) => "CONVERSION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
