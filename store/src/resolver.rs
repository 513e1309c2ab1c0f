//! Manifest tree resolution.
//!
//! An artifact's catalog entry may point at a single manifest or at an
//! index whose children are manifests or further indexes. Resolution
//! flattens the tree into its leaf manifests, depth-first and in the order
//! each index lists its children.

use std::collections::HashSet;

use a3s_artifact_core::config::ResolveLimits;
use a3s_artifact_core::error::{ArtifactError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::digest::sha256_digest;
use crate::manifest::{ImageManifest, ManifestDocument, MediaType};

/// Anything manifests can be fetched from by digest.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch raw manifest bytes and their media type.
    ///
    /// `None` asks for the source's root manifest.
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, MediaType)>;
}

/// Flattens manifest trees within fixed bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestResolver {
    limits: ResolveLimits,
}

/// Every document of a resolved tree.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTree {
    /// Leaf manifests, depth-first in listed order.
    pub manifests: Vec<ImageManifest>,
    /// Digests of every manifest and index visited, in visit order.
    pub documents: Vec<String>,
}

impl ResolvedTree {
    /// Every blob digest the tree references: its documents plus each leaf's
    /// config and layers.
    pub fn blob_digests(&self) -> HashSet<String> {
        let mut digests: HashSet<String> = self.documents.iter().cloned().collect();
        for manifest in &self.manifests {
            digests.insert(manifest.config().digest().clone());
            digests.extend(manifest.layers().iter().map(|l| l.digest().clone()));
        }
        digests
    }
}

/// Mutable state of one resolution.
struct Walk {
    /// Digests of the indexes currently being expanded, root first.
    path: Vec<String>,
    fetched: usize,
    tree: ResolvedTree,
}

impl ManifestResolver {
    pub fn new(limits: ResolveLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ResolveLimits {
        self.limits
    }

    /// Resolve `start` (or the root manifest) into its leaf manifests.
    pub async fn resolve(&self, source: &dyn ManifestSource, start: Option<&str>) -> Result<Vec<ImageManifest>> {
        Ok(self.resolve_tree(source, start).await?.manifests)
    }

    /// Like [`resolve`](Self::resolve), also reporting every document visited.
    pub async fn resolve_tree(&self, source: &dyn ManifestSource, start: Option<&str>) -> Result<ResolvedTree> {
        let mut walk = Walk {
            path: Vec::new(),
            fetched: 0,
            tree: ResolvedTree::default(),
        };
        self.visit(source, start.map(str::to_string), &mut walk).await?;
        Ok(walk.tree)
    }

    fn visit<'a>(
        &'a self,
        source: &'a dyn ManifestSource,
        digest: Option<String>,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            walk.fetched += 1;
            if walk.fetched > self.limits.max_manifests {
                return Err(ArtifactError::malformed(
                    "manifest tree",
                    format!("more than {} manifests", self.limits.max_manifests),
                ));
            }

            let (data, media_type) = source.get_manifest(digest.as_deref()).await?;
            let digest = digest.unwrap_or_else(|| sha256_digest(&data));
            walk.tree.documents.push(digest.clone());

            match ManifestDocument::parse(&data, &media_type)? {
                ManifestDocument::Manifest(manifest) => {
                    walk.tree.manifests.push(manifest);
                    Ok(())
                }
                ManifestDocument::Index(index) => {
                    if walk.path.len() >= self.limits.max_depth {
                        return Err(ArtifactError::malformed(
                            "manifest tree",
                            format!("index {} nested deeper than {}", digest, self.limits.max_depth),
                        ));
                    }
                    let children = index.manifests();
                    if children.len() > self.limits.max_manifests {
                        return Err(ArtifactError::malformed(
                            "manifest tree",
                            format!(
                                "index {} lists {} children, limit is {}",
                                digest,
                                children.len(),
                                self.limits.max_manifests
                            ),
                        ));
                    }

                    walk.path.push(digest);
                    for child in children {
                        if walk.path.contains(child.digest()) {
                            return Err(ArtifactError::malformed(
                                "manifest tree",
                                format!("cycle through {}", child.digest()),
                            ));
                        }
                        self.visit(source, Some(child.digest().clone()), walk).await?;
                    }
                    walk.path.pop();
                    Ok(())
                }
            }
        }
        .boxed()
    }
}
