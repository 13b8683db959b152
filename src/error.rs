use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The operation a failure belongs to. Batch operations wrap every per-item failure in the kind
/// of the operation that was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    NotSupported,
    Validation,
    Registration,
    Uploading,
    Retrieval,
    Downloading,
    Updating,
    Tagging,
    Deprecation,
    Querying,
    Freezing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum StoreError {
    #[error("Store configuration error: {0}")]
    Configuration(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Registration error: {0}")]
    Registration(String),
    #[error("Uploading error: {0}")]
    Uploading(String),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Downloading error: {0}")]
    Downloading(String),
    #[error("Updating error: {0}")]
    Updating(String),
    #[error("Tagging error: {0}")]
    Tagging(String),
    #[error("Deprecation error: {0}")]
    Deprecation(String),
    #[error("Querying error: {0}")]
    Querying(String),
    #[error("Freezing error: {0}")]
    Freezing(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Build the error matching `kind`.
    pub fn from_kind(kind: ErrorKind, msg: impl Into<String>) -> StoreError {
        let msg = msg.into();
        match kind {
            ErrorKind::Configuration => StoreError::Configuration(msg),
            ErrorKind::NotSupported => StoreError::NotSupported(msg),
            ErrorKind::Validation => StoreError::Validation(msg),
            ErrorKind::Registration => StoreError::Registration(msg),
            ErrorKind::Uploading => StoreError::Uploading(msg),
            ErrorKind::Retrieval => StoreError::Retrieval(msg),
            ErrorKind::Downloading => StoreError::Downloading(msg),
            ErrorKind::Updating => StoreError::Updating(msg),
            ErrorKind::Tagging => StoreError::Tagging(msg),
            ErrorKind::Deprecation => StoreError::Deprecation(msg),
            ErrorKind::Querying => StoreError::Querying(msg),
            ErrorKind::Freezing => StoreError::Freezing(msg),
        }
    }

    /// The operation kind of this error. Ambient failures (io, serialization) have none.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            StoreError::Configuration(_) => Some(ErrorKind::Configuration),
            StoreError::NotSupported(_) => Some(ErrorKind::NotSupported),
            StoreError::Validation(_) => Some(ErrorKind::Validation),
            StoreError::Registration(_) => Some(ErrorKind::Registration),
            StoreError::Uploading(_) => Some(ErrorKind::Uploading),
            StoreError::Retrieval(_) => Some(ErrorKind::Retrieval),
            StoreError::Downloading(_) => Some(ErrorKind::Downloading),
            StoreError::Updating(_) => Some(ErrorKind::Updating),
            StoreError::Tagging(_) => Some(ErrorKind::Tagging),
            StoreError::Deprecation(_) => Some(ErrorKind::Deprecation),
            StoreError::Querying(_) => Some(ErrorKind::Querying),
            StoreError::Freezing(_) => Some(ErrorKind::Freezing),
            StoreError::Io(_) | StoreError::Serialization(_) => None,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            StoreError::Configuration(m)
            | StoreError::NotSupported(m)
            | StoreError::Validation(m)
            | StoreError::Registration(m)
            | StoreError::Uploading(m)
            | StoreError::Retrieval(m)
            | StoreError::Downloading(m)
            | StoreError::Updating(m)
            | StoreError::Tagging(m)
            | StoreError::Deprecation(m)
            | StoreError::Querying(m)
            | StoreError::Freezing(m)
            | StoreError::Io(m)
            | StoreError::Serialization(m) => m,
        }
    }

    /// Re-tag this failure as `kind`, keeping its message.
    pub fn rewrap(self, kind: ErrorKind) -> StoreError {
        if self.kind() == Some(kind) {
            return self;
        }
        StoreError::from_kind(kind, self.message())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(src: toml::de::Error) -> StoreError {
        StoreError::Configuration(format!("Toml deserialization error: {src}"))
    }
}

impl From<JsonError> for StoreError {
    fn from(src: JsonError) -> StoreError {
        StoreError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<UrlParseError> for StoreError {
    fn from(src: UrlParseError) -> StoreError {
        StoreError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for StoreError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => StoreError::Io(format!("Not found: {x}")),
            _ => StoreError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

// Transport failures carry no operation; callers rewrap them with the running operation's kind.
impl From<reqwest::Error> for StoreError {
    fn from(x: reqwest::Error) -> Self {
        StoreError::Io(format!("HTTP transport error: {x}"))
    }
}

impl From<reqwest::header::InvalidHeaderValue> for StoreError {
    fn from(x: reqwest::header::InvalidHeaderValue) -> Self {
        StoreError::Configuration(format!("Invalid header value: {x}"))
    }
}
