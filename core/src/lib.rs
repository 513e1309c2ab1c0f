//! A3S Artifact Core - Foundational Types
//!
//! Error taxonomy, configuration and OCI constants shared by the artifact
//! store and its command-line front end.

pub mod config;
pub mod error;
pub mod oci;

// Re-export commonly used types
pub use config::{default_store_path, ResolveLimits, StoreConfig, TransferOptions};
pub use error::{ArtifactError, ErrorKind, Result};

/// A3S Artifact version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
