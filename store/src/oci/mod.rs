//! Registry side of the artifact store.
//!
//! Image reference parsing, registry credentials and the
//! [`RegistryTransport`] that copies artifacts between a registry and a
//! local layout.

pub mod credentials;
pub mod reference;
pub mod registry;

pub use credentials::CredentialStore;
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryTransport};
