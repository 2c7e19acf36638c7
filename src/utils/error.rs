//! Error types and handling
//!
//! Top-level error taxonomy returned by the engine commands, plus the
//! serializable response shape handed to callers.

use crate::cache::CacheError;
use crate::decode::DecodeError;
use crate::pipeline::ExtractionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or contradictory caller arguments, detected before any work.
    #[error("Invalid arguments: {0}")]
    Argument(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Argument(_) => "ARGUMENT_ERROR",
            EngineError::Extraction(e) => match e {
                ExtractionError::Decode(decode) => match decode {
                    DecodeError::NotFound(_) => "FILE_NOT_FOUND",
                    DecodeError::UnsupportedSource(_) => "UNSUPPORTED_SOURCE",
                    DecodeError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
                    DecodeError::CorruptStream(_) => "CORRUPT_STREAM",
                    DecodeError::Network(_) => "NETWORK_FAILURE",
                    DecodeError::Io(_) => "IO_ERROR",
                    DecodeError::Cancelled => "CANCELLED",
                },
                ExtractionError::EmptyAudio(_) => "CORRUPT_STREAM",
                ExtractionError::Cancelled => "CANCELLED",
                ExtractionError::Internal(_) => "INTERNAL_ERROR",
            },
            EngineError::Cache(_) => "CACHE_IO_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DecodeError> for EngineError {
    fn from(error: DecodeError) -> Self {
        EngineError::Extraction(ExtractionError::Decode(error))
    }
}

/// Error response for callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(error: &EngineError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<EngineError> for ErrorResponse {
    fn from(error: EngineError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EngineError::Argument("cacheKey or audioPath should be provided".into());
        assert_eq!(err.code(), "ARGUMENT_ERROR");

        let err: EngineError = DecodeError::NotFound("/missing.wav".into()).into();
        assert_eq!(err.code(), "FILE_NOT_FOUND");

        let err = EngineError::Extraction(ExtractionError::Cancelled);
        assert_eq!(err.code(), "CANCELLED");
    }

    #[test]
    fn test_error_response_carries_message() {
        let err: EngineError = DecodeError::Network("connection reset".into()).into();
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "NETWORK_FAILURE");
        assert!(response.message.contains("connection reset"));
    }
}
