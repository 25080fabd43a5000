/// Core error types for the Relief pipeline.
use std::fmt;

/// A specialized Result type for Relief operations.
pub type ReliefResult<T> = Result<T, ReliefError>;

/// Top-level error type encompassing all Relief subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ReliefError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("reconstruction error: {0}")]
    Reconstruction(String),

    #[error("cycle error: attaching {object} under {parent} would create a cycle")]
    Cycle { object: String, parent: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("conflict: {entity} is at version {actual}, edit was read at version {expected}")]
    Conflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    #[error("external service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Copyable classification of a [`ReliefError`], used for status reporting
/// and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Validation,
    Reconstruction,
    Cycle,
    Render,
    Encoding,
    Conflict,
    ExternalService,
    NotFound,
    Cancelled,
    Config,
    Io,
    Serialization,
    Image,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Reconstruction => "reconstruction",
            ErrorKind::Cycle => "cycle",
            ErrorKind::Render => "render",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Image => "image",
        };
        write!(f, "{}", s)
    }
}

impl ReliefError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ReliefError::Validation(message.into())
    }

    /// Create a reconstruction error.
    pub fn reconstruction(message: impl Into<String>) -> Self {
        ReliefError::Reconstruction(message.into())
    }

    /// Create a render error.
    pub fn render(message: impl Into<String>) -> Self {
        ReliefError::Render(message.into())
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        ReliefError::Encoding(message.into())
    }

    /// Create a cycle error for an attach of `object` under `parent`.
    pub fn cycle(object: impl fmt::Display, parent: impl fmt::Display) -> Self {
        ReliefError::Cycle {
            object: object.to_string(),
            parent: parent.to_string(),
        }
    }

    /// Create an optimistic-version conflict error.
    pub fn conflict(entity: impl Into<String>, expected: u64, actual: u64) -> Self {
        ReliefError::Conflict {
            entity: entity.into(),
            expected,
            actual,
        }
    }

    /// Create an external service error.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        ReliefError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        ReliefError::NotFound(what.into())
    }

    /// Create a cancellation error.
    pub fn cancelled(what: impl Into<String>) -> Self {
        ReliefError::Cancelled(what.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReliefError::Validation(_) => ErrorKind::Validation,
            ReliefError::Reconstruction(_) => ErrorKind::Reconstruction,
            ReliefError::Cycle { .. } => ErrorKind::Cycle,
            ReliefError::Render(_) => ErrorKind::Render,
            ReliefError::Encoding(_) => ErrorKind::Encoding,
            ReliefError::Conflict { .. } => ErrorKind::Conflict,
            ReliefError::ExternalService { .. } => ErrorKind::ExternalService,
            ReliefError::NotFound(_) => ErrorKind::NotFound,
            ReliefError::Cancelled(_) => ErrorKind::Cancelled,
            ReliefError::Config(_) => ErrorKind::Config,
            ReliefError::Io(_) => ErrorKind::Io,
            ReliefError::Serialization(_) => ErrorKind::Serialization,
            ReliefError::Image(_) => ErrorKind::Image,
        }
    }

    /// Only external-service failures are retried automatically.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExternalService
    }
}
