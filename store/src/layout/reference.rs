//! Named views of a layout used by transports.
//!
//! A [`LayoutReference`] is one artifact name inside a store. Its source
//! side reads committed content; its destination side stages everything in
//! a private directory and only touches the blob pool and catalog in
//! [`LayoutDestination::commit`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use a3s_artifact_core::error::{ArtifactError, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::LayoutStorage;
use crate::digest::{sha256_digest, split_digest, DigestWriter};
use crate::index::IndexManager;
use crate::lock::{CatalogLock, LockMode};
use crate::manifest::{detect_media_type, Descriptor, DescriptorExt, MediaType};
use crate::resolver::ManifestSource;

/// One named artifact inside a store.
#[derive(Clone)]
pub struct LayoutReference {
    storage: Arc<dyn LayoutStorage>,
    name: String,
    name_annotation: String,
    lock_timeout: Duration,
}

impl std::fmt::Debug for LayoutReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutReference")
            .field("root", &self.storage.root())
            .field("name", &self.name)
            .finish()
    }
}

impl std::fmt::Display for LayoutReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oci:{}:{}", self.storage.root().display(), self.name)
    }
}

impl LayoutReference {
    pub fn new(
        storage: Arc<dyn LayoutStorage>,
        name: impl Into<String>,
        name_annotation: impl Into<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            name: name.into(),
            name_annotation: name_annotation.into(),
            lock_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    fn index_manager(&self) -> IndexManager {
        IndexManager::new(self.storage.clone(), self.name_annotation.clone())
    }

    /// Open the committed artifact for reading.
    ///
    /// Fails `NotFound` when the catalog has no entry with this name. The
    /// caller is expected to hold at least a shared catalog lock.
    pub async fn new_image_source(&self) -> Result<LayoutSource> {
        let manager = self.index_manager();
        let index = manager.load().await?;
        let (_, root) = manager
            .find_by_name(&index, &self.name)
            .ok_or_else(|| ArtifactError::NotFound(format!("artifact {}", self.name)))?;

        Ok(LayoutSource {
            storage: self.storage.clone(),
            root: root.clone(),
        })
    }

    /// Open a staging destination that publishes under this name on commit.
    pub async fn new_image_destination(&self) -> Result<LayoutDestination> {
        let staging_root = self.storage.staging_dir();
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(|e| ArtifactError::io(&staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix("dest-")
            .tempdir_in(&staging_root)
            .map_err(|e| ArtifactError::io(&staging_root, e))?;

        Ok(LayoutDestination {
            reference: self.clone(),
            staging,
            staged: HashMap::new(),
            reused: HashSet::new(),
            root: None,
        })
    }
}

/// Read side of a committed artifact.
pub struct LayoutSource {
    storage: Arc<dyn LayoutStorage>,
    root: Descriptor,
}

impl std::fmt::Debug for LayoutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutSource")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LayoutSource {
    /// Source rooted at an arbitrary catalog entry, named or not.
    pub fn for_entry(storage: Arc<dyn LayoutStorage>, root: Descriptor) -> Self {
        Self { storage, root }
    }

    /// Catalog descriptor of the artifact's root manifest.
    pub fn root_descriptor(&self) -> &Descriptor {
        &self.root
    }

    /// Read a blob, verifying its content against the digest.
    pub async fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let data = self.storage.read_blob(digest).await?;
        verify_digest(digest, &data)?;
        Ok(data)
    }
}

#[async_trait]
impl ManifestSource for LayoutSource {
    async fn get_manifest(&self, digest: Option<&str>) -> Result<(Vec<u8>, MediaType)> {
        let digest = digest.unwrap_or(self.root.digest().as_str());
        let data = self.get_blob(digest).await?;
        let media_type = if digest == self.root.digest() {
            self.root.media_type().clone()
        } else {
            detect_media_type(&data)?
        };
        Ok((data, media_type))
    }
}

/// Write side of a named artifact.
///
/// Blobs and manifests are staged privately and verified on arrival.
/// Nothing is visible in the store until [`commit`](Self::commit); dropping
/// the destination discards the staging directory.
///
/// Blobs the store already holds are reused rather than staged. Those are
/// checked again at commit, under the exclusive lock, since a concurrent
/// `remove` may have reclaimed them in the meantime.
pub struct LayoutDestination {
    reference: LayoutReference,
    staging: tempfile::TempDir,
    staged: HashMap<String, PathBuf>,
    reused: HashSet<String>,
    root: Option<Descriptor>,
}

impl LayoutDestination {
    pub fn reference(&self) -> &LayoutReference {
        &self.reference
    }

    /// Whether a blob is already staged or committed.
    ///
    /// A committed blob reported here is recorded as reused and must still
    /// exist when the destination commits.
    pub async fn has_blob(&mut self, digest: &str) -> Result<bool> {
        if self.staged.contains_key(digest) {
            return Ok(true);
        }
        let committed = self.reference.storage.has_blob(digest).await?;
        if committed {
            self.reused.insert(digest.to_string());
        }
        Ok(committed)
    }

    /// Stage blob bytes that must hash to `digest`.
    pub async fn put_blob(&mut self, digest: &str, data: &[u8]) -> Result<()> {
        verify_digest(digest, data)?;
        let path = self.staging_path(digest)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;
        self.staged.insert(digest.to_string(), path);
        Ok(())
    }

    /// Path a transport streams a blob into before calling
    /// [`finish_blob`](Self::finish_blob).
    pub fn blob_staging_path(&self, digest: &str) -> Result<PathBuf> {
        self.staging_path(digest)
    }

    /// Verify and register a blob written to [`blob_staging_path`](Self::blob_staging_path).
    pub async fn finish_blob(&mut self, digest: &str) -> Result<()> {
        let path = self.staging_path(digest)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;

        let mut hasher = DigestWriter::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| ArtifactError::io(&path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let (actual, _) = hasher.finish();
        if actual != digest {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(digest_mismatch(digest, &actual));
        }
        self.staged.insert(digest.to_string(), path);
        Ok(())
    }

    /// Stage a manifest document and return its digest.
    ///
    /// The manifest marked `is_root` becomes the catalog entry on commit.
    pub async fn put_manifest(&mut self, data: &[u8], media_type: &MediaType, is_root: bool) -> Result<String> {
        let digest = sha256_digest(data);
        self.put_blob(&digest, data).await?;
        if is_root {
            self.root = Some(Descriptor::new(media_type.clone(), data.len() as i64, digest.clone()));
        }
        Ok(digest)
    }

    /// Publish staged content and point the catalog entry at the root
    /// manifest.
    ///
    /// Waiting for the catalog lock can be cancelled. Once the lock is held
    /// the import and catalog write run to completion on their own task, so
    /// a caller giving up midway cannot leave a half-applied commit.
    ///
    /// Fails `NotFound` without importing anything when a reused blob has
    /// disappeared from the store.
    pub async fn commit(self) -> Result<Descriptor> {
        let root = self.root.clone().ok_or_else(|| {
            ArtifactError::malformed("destination", "no root manifest was written")
        })?;
        let name = self.reference.name.clone();
        let lock = CatalogLock::acquire(
            self.reference.root(),
            LockMode::Exclusive,
            self.reference.lock_timeout,
        )
        .await?;

        let task = tokio::spawn(async move {
            let _lock = lock;
            let LayoutDestination {
                reference,
                staging,
                staged,
                reused,
                ..
            } = self;

            for digest in &reused {
                if !reference.storage.has_blob(digest).await? {
                    return Err(ArtifactError::NotFound(format!(
                        "blob {} reused by {} was removed before commit",
                        digest, reference.name
                    )));
                }
            }

            for (digest, path) in &staged {
                reference.storage.import_blob(path, digest).await?;
            }

            let manager = reference.index_manager();
            let mut index = manager.load().await?;
            let entry = root.with_annotation(manager.name_annotation(), reference.name.clone());
            manager.upsert(&mut index, entry.clone());
            manager.save(&index).await?;
            drop(staging);

            tracing::debug!(
                name = %reference.name,
                digest = %entry.digest(),
                staged = staged.len(),
                reused = reused.len(),
                "Destination committed"
            );
            Ok(entry)
        });

        task.await.map_err(|e| {
            ArtifactError::Cancelled(format!("commit of {} did not finish: {}", name, e))
        })?
    }

    fn staging_path(&self, digest: &str) -> Result<PathBuf> {
        let (_, encoded) = split_digest(digest)?;
        Ok(self.staging.path().join(encoded))
    }
}

fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    let actual = sha256_digest(data);
    if actual != expected {
        return Err(digest_mismatch(expected, &actual));
    }
    Ok(())
}

fn digest_mismatch(expected: &str, actual: &str) -> ArtifactError {
    ArtifactError::malformed(
        "blob",
        format!("content digest {} does not match {}", actual, expected),
    )
}
