use ledger::LedgerError;
use thiserror::Error;

/// Malformed or missing message fields, raised before any I/O
#[derive(Error, Debug)]
pub enum ParameterError {
    #[error("Missing required parameter '{0}'")]
    Missing(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ParameterError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ParameterError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Object I/O error at {location}/{key}: {source}")]
    ObjectIo {
        location: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Cannot merge into {destination}: {reason}")]
    FormatMismatch { destination: String, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot rewrite path '{key}': {reason}")]
    Rewrite { key: String, reason: String },

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Destination {destination} is targeted by both {first} and {second}")]
    DestinationConflict {
        destination: String,
        first: String,
        second: String,
    },

    #[error("Unknown object location '{0}'")]
    UnknownLocation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn object_io(
        location: impl Into<String>,
        key: impl Into<String>,
        source: object_store::Error,
    ) -> Self {
        Error::ObjectIo {
            location: location.into(),
            key: key.into(),
            source,
        }
    }

    pub fn format_mismatch(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::FormatMismatch {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    pub fn rewrite(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Rewrite {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Failures of the ledger itself leave the invocation unrecorded
    #[must_use]
    pub fn is_ledger(&self) -> bool {
        matches!(self, Error::Ledger(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
