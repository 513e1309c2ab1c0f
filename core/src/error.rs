use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an [`ArtifactError`].
///
/// Callers branch on this instead of matching message strings; it looks
/// through [`ArtifactError::Operation`] wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unnamed,
    Malformed,
    Io,
    Transport,
    LockTimeout,
    Cancelled,
    InvalidReference,
    Config,
    Serialization,
}

/// A3S artifact store error types
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Named artifact or source file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog entry carries no naming annotation
    #[error("Artifact is unnamed: {digest}")]
    Unnamed { digest: String },

    /// Catalog or manifest content is unparsable or of an unexpected type
    #[error("Malformed {what}: {message}")]
    Malformed { what: String, message: String },

    /// Filesystem failure at a known path
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote copy failure
    #[error("Transport error: {reference} - {message}")]
    Transport { reference: String, message: String },

    /// Catalog lock not acquired in time
    #[error("Timed out after {waited:?} waiting for catalog lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Cancellation token fired or deadline expired
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Unparsable image reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Error tagged with the store operation and its target
    #[error("{op} {target}: {source}")]
    Operation {
        op: &'static str,
        target: String,
        #[source]
        source: Box<ArtifactError>,
    },
}

impl ArtifactError {
    /// Build a `Malformed` error.
    pub fn malformed(what: impl Into<String>, message: impl Into<String>) -> Self {
        ArtifactError::Malformed {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Build an `Io` error carrying the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag this error with an operation name and target.
    ///
    /// Already-tagged errors are returned unchanged so nested store calls
    /// don't stack prefixes.
    pub fn context(self, op: &'static str, target: impl Into<String>) -> Self {
        match self {
            tagged @ ArtifactError::Operation { .. } => tagged,
            other => ArtifactError::Operation {
                op,
                target: target.into(),
                source: Box::new(other),
            },
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArtifactError::NotFound(_) => ErrorKind::NotFound,
            ArtifactError::Unnamed { .. } => ErrorKind::Unnamed,
            ArtifactError::Malformed { .. } => ErrorKind::Malformed,
            ArtifactError::Io { .. } => ErrorKind::Io,
            ArtifactError::Transport { .. } => ErrorKind::Transport,
            ArtifactError::LockTimeout { .. } => ErrorKind::LockTimeout,
            ArtifactError::Cancelled(_) => ErrorKind::Cancelled,
            ArtifactError::InvalidReference(_) => ErrorKind::InvalidReference,
            ArtifactError::ConfigError(_) => ErrorKind::Config,
            ArtifactError::SerializationError(_) => ErrorKind::Serialization,
            ArtifactError::Operation { source, .. } => source.kind(),
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ArtifactError {
    fn from(err: serde_yaml::Error) -> Self {
        ArtifactError::SerializationError(err.to_string())
    }
}

impl From<oci_spec::OciSpecError> for ArtifactError {
    fn from(err: oci_spec::OciSpecError) -> Self {
        ArtifactError::SerializationError(err.to_string())
    }
}

/// Result type alias for artifact store operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
