//! Resolved view of a catalog entry.

use a3s_artifact_core::error::{ArtifactError, Result};
use serde::Serialize;

use crate::manifest::{layers_size, Descriptor, DescriptorExt, ImageManifest};

/// A catalog entry together with its resolved leaf manifests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Catalog descriptor of the root manifest.
    pub descriptor: Descriptor,
    /// Leaf manifests in resolution order.
    pub manifests: Vec<ImageManifest>,
    #[serde(skip)]
    name_annotation: String,
}

impl Artifact {
    pub fn new(descriptor: Descriptor, manifests: Vec<ImageManifest>, name_annotation: impl Into<String>) -> Self {
        Self {
            descriptor,
            manifests,
            name_annotation: name_annotation.into(),
        }
    }

    /// The artifact's name, or `Unnamed` when the entry carries none.
    pub fn name(&self) -> Result<&str> {
        self.descriptor
            .annotation(&self.name_annotation)
            .ok_or_else(|| ArtifactError::Unnamed {
                digest: self.descriptor.digest().clone(),
            })
    }

    /// Digest of the root manifest.
    pub fn digest(&self) -> &str {
        self.descriptor.digest()
    }

    /// Sum of every layer size across all leaf manifests.
    ///
    /// Layers shared between manifests are counted once per manifest.
    pub fn total_size(&self) -> i64 {
        self.manifests.iter().map(layers_size).sum()
    }

    /// Number of layers across all leaf manifests.
    pub fn layer_count(&self) -> usize {
        self.manifests.iter().map(|m| m.layers().len()).sum()
    }
}

/// Artifacts in catalog order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ArtifactList(Vec<Artifact>);

impl ArtifactList {
    /// First artifact named `name`. Unnamed entries never match.
    pub fn get_by_name(&self, name: &str) -> Option<&Artifact> {
        self.0.iter().find(|a| a.name().ok() == Some(name))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Artifact> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Artifact> {
        self.0
    }
}

impl From<Vec<Artifact>> for ArtifactList {
    fn from(artifacts: Vec<Artifact>) -> Self {
        Self(artifacts)
    }
}

impl IntoIterator for ArtifactList {
    type Item = Artifact;
    type IntoIter = std::vec::IntoIter<Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ArtifactList {
    type Item = &'a Artifact;
    type IntoIter = std::slice::Iter<'a, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
