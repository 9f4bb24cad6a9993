//! Error types for the dispatcher

use std::io;
use thiserror::Error;

/// Dispatcher error type
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown use case {0}")]
    UnknownUseCase(String),

    #[error("Unknown dispatch action '{value}' on file {path}")]
    UnknownAction { path: String, value: String },

    #[error("Reroute error: {0}")]
    Reroute(String),

    #[error("File {path} too large. {size} > {max}")]
    FileSize { path: String, size: u64, max: u64 },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Found protocol not matching folder name: {path} in bucket {bucket}")]
    ProtocolName { path: String, bucket: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object {path} can't be found in bucket {bucket}")]
    ObjectNotFound { bucket: String, path: String },

    #[error("Presigned URL error: {0}")]
    PresignedUrl(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DispatchError {
    /// Stable identifier written to the error-class tag.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::UnknownUseCase(_) => "UseCaseError",
            Self::UnknownAction { .. } => "DispatchActionError",
            Self::Reroute(_) => "RerouteError",
            Self::FileSize { .. } => "FileSizeError",
            Self::Metadata(_) => "MetadataError",
            Self::ProtocolName { .. } => "ProtocolNameError",
            Self::Validation(_) => "ValidationError",
            Self::Storage(_) | Self::Io(_) => "StorageError",
            Self::ObjectNotFound { .. } => "ObjectNotFoundError",
            Self::PresignedUrl(_) => "PresignedUrlError",
            Self::Protocol(_) => "ProtocolError",
            Self::Pattern(_) => "PatternError",
            Self::Json(_) => "JsonError",
            Self::Notification(_) => "NotificationError",
            Self::Config(_) => "ConfigError",
        }
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size_message_names_limit() {
        let err = DispatchError::FileSize {
            path: "a/b.pdf".to_string(),
            size: 11,
            max: 10,
        };
        assert_eq!(err.to_string(), "File a/b.pdf too large. 11 > 10");
        assert_eq!(err.class_name(), "FileSizeError");
    }

    #[test]
    fn test_io_errors_are_storage_class() {
        let err: DispatchError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert_eq!(err.class_name(), "StorageError");
    }
}
