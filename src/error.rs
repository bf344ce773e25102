//! Error taxonomy for vectorbase.
//!
//! Five kinds, matching the AWS-style error envelope the REST layer
//! returns: Validation, NotFound, Conflict, Dependency, Internal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Error::Dependency(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// HTTP status code for this error kind (spec.md §7).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Dependency(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// AWS-style PascalCase error code for the JSON envelope.
    pub fn aws_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationException",
            Error::NotFound(_) => "ResourceNotFoundException",
            Error::Conflict(_) => "ConflictException",
            Error::Dependency(_) => "ServiceUnavailableException",
            Error::Internal(_) => "InternalServiceException",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Validation(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::Dependency(m)
            | Error::Internal(m) => m.clone(),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        match &e {
            object_store::Error::NotFound { .. } => Error::NotFound(e.to_string()),
            _ => Error::Dependency(e.to_string()),
        }
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Dependency(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(Error::validation("x").status_code(), 400);
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::conflict("x").status_code(), 409);
        assert_eq!(Error::dependency("x").status_code(), 503);
        assert_eq!(Error::internal("x").status_code(), 500);
    }

    #[test]
    fn aws_codes_are_pascal_case() {
        assert_eq!(Error::validation("x").aws_code(), "ValidationException");
        assert_eq!(Error::not_found("x").aws_code(), "ResourceNotFoundException");
    }
}
