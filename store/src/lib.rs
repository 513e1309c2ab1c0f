//! A3S Artifact Store - local OCI artifact storage.
//!
//! Stores named artifacts in an OCI image layout: a catalog (`index.json`)
//! of named entries, a content-addressed blob pool, recursive manifest
//! resolution and push/pull through a pluggable [`Transport`].

#![allow(clippy::result_large_err)]

pub mod artifact;
pub mod blob;
pub mod context;
pub mod digest;
pub mod index;
pub mod layout;
pub mod lock;
pub mod manifest;
pub mod oci;
pub mod resolver;
pub mod store;
pub mod transport;

// Re-export common types
pub use artifact::{Artifact, ArtifactList};
pub use blob::BlobWriter;
pub use context::OpContext;
pub use index::IndexManager;
pub use layout::{LayoutDestination, LayoutReference, LayoutSource, LayoutStorage, OciLayout};
pub use lock::{CatalogLock, LockMode};
pub use manifest::{Descriptor, DescriptorExt, ImageIndex, ImageManifest, ManifestDocument, MediaType};
pub use oci::{CredentialStore, ImageReference, RegistryAuth, RegistryTransport};
pub use resolver::{ManifestResolver, ManifestSource, ResolvedTree};
pub use store::ArtifactStore;
pub use transport::{TransferRef, Transport};

pub use a3s_artifact_core::{ArtifactError, ErrorKind, Result, StoreConfig};

/// A3S Artifact Store version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
