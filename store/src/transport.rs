//! Copy engine between a local layout and a remote registry.

use a3s_artifact_core::config::TransferOptions;
use a3s_artifact_core::error::Result;
use async_trait::async_trait;

use crate::layout::LayoutReference;
use crate::oci::ImageReference;

/// Either end of a copy.
#[derive(Debug, Clone)]
pub enum TransferRef {
    /// A repository/tag on a remote registry.
    Registry(ImageReference),
    /// A named artifact in a local store.
    Layout(LayoutReference),
}

impl std::fmt::Display for TransferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferRef::Registry(reference) => write!(f, "docker://{}", reference),
            TransferRef::Layout(reference) => write!(f, "{}", reference),
        }
    }
}

/// Moves a manifest tree and its blobs from `src` to `dst`.
///
/// Retries, TLS and credentials come from `options`; the store passes them
/// through without interpreting them. A layout destination must only become
/// visible through [`LayoutDestination::commit`](crate::layout::LayoutDestination::commit),
/// so a failed or dropped copy leaves the store untouched.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn copy(&self, src: &TransferRef, dst: &TransferRef, options: &TransferOptions) -> Result<()>;
}
