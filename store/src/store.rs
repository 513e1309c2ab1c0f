//! Artifact store facade.
//!
//! Composes the catalog, blob writer, resolver and transport into the
//! operations callers use: add, remove, list, inspect, push and pull.
//!
//! Mutations hold the exclusive catalog lock from the first catalog read to
//! the commit. All content a new catalog entry references is written and
//! synced before the entry is saved, so a crash or cancellation leaves at
//! worst unreferenced blobs behind. Blobs are only ever reclaimed while the
//! exclusive lock is held.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use a3s_artifact_core::config::StoreConfig;
use a3s_artifact_core::error::{ArtifactError, Result};
use a3s_artifact_core::oci::is_index_media_type;

use crate::artifact::{Artifact, ArtifactList};
use crate::blob::BlobWriter;
use crate::context::OpContext;
use crate::index::IndexManager;
use crate::layout::{LayoutReference, LayoutSource, LayoutStorage, OciLayout};
use crate::lock::{CatalogLock, LockMode};
use crate::manifest::{
    empty_artifact_manifest, parse_manifest, Descriptor, DescriptorExt, ImageIndex, ImageManifest,
    MediaType,
};
use crate::oci::{ImageReference, RegistryTransport};
use crate::resolver::ManifestResolver;
use crate::transport::{TransferRef, Transport};

/// Staging entries older than this are left over from crashed runs.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Local OCI artifact store rooted at one directory.
pub struct ArtifactStore {
    config: StoreConfig,
    storage: Arc<dyn LayoutStorage>,
    index: IndexManager,
    resolver: ManifestResolver,
    blobs: BlobWriter,
    transport: Arc<dyn Transport>,
}

impl ArtifactStore {
    /// Open (creating if needed) the store described by `config`, using the
    /// registry transport for push and pull.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let transport = Arc::new(RegistryTransport::new(config.resolve));
        Self::with_transport(config, transport).await
    }

    /// Open the store with a caller-supplied transport.
    pub async fn with_transport(config: StoreConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let root = config.store_path();
        let storage: Arc<dyn LayoutStorage> = Arc::new(OciLayout::open(&root).await?);
        let store = Self {
            index: IndexManager::new(storage.clone(), config.name_annotation.clone()),
            resolver: ManifestResolver::new(config.resolve),
            blobs: BlobWriter::new(storage.clone()),
            storage,
            transport,
            config,
        };

        let _lock = store.lock(LockMode::Exclusive).await?;
        store.index.load().await?;
        store.sweep_staging().await;
        tracing::debug!(root = %root.display(), "Artifact store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Name of an artifact; `Unnamed` when its entry has no name annotation.
    pub fn get_name(artifact: &Artifact) -> Result<&str> {
        artifact.name()
    }

    /// Sum of layer sizes across all of an artifact's leaf manifests.
    pub fn total_size_bytes(artifact: &Artifact) -> i64 {
        artifact.total_size()
    }

    /// Append the file at `path` as a new layer of artifact `name`, creating
    /// the artifact on first use. Returns the new manifest digest.
    ///
    /// `artifact_type` overrides the configured layer media type.
    pub async fn add(
        &self,
        ctx: &OpContext,
        name: &str,
        path: &Path,
        artifact_type: Option<&str>,
    ) -> Result<String> {
        self.add_inner(ctx, name, path, artifact_type)
            .await
            .map_err(|e| e.context("add", name))
    }

    async fn add_inner(
        &self,
        ctx: &OpContext,
        name: &str,
        path: &Path,
        artifact_type: Option<&str>,
    ) -> Result<String> {
        BlobWriter::check_source(path).await?;
        let media_type = MediaType::from(
            artifact_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(self.config.layer_media_type.as_str()),
        );

        let (lock, index, entry) = ctx
            .run(async {
                // Streaming the file needs no lock; only the catalog
                // read-modify-write below does.
                let mut layer = self.blobs.write_layer(path, media_type.clone()).await?;

                let lock = self.lock(LockMode::Exclusive).await?;
                let mut index = self.index.load().await?;
                let previous = self.index.find_by_name(&index, name).map(|(_, d)| d.clone());

                // A remove that held the lock meanwhile may have reclaimed an
                // identical blob.
                if !self.storage.has_blob(layer.digest()).await? {
                    layer = self.blobs.write_layer(path, media_type).await?;
                }
                let mut manifest = match &previous {
                    Some(entry) => self.editable_manifest(entry).await?,
                    None => {
                        self.blobs.ensure_empty_config().await?;
                        empty_artifact_manifest()?
                    }
                };
                let mut entry = self.blobs.append_layer(&mut manifest, layer).await?;

                if let Some(previous) = &previous {
                    entry.set_annotations(previous.annotations().clone());
                }
                entry.set_annotation(self.config.name_annotation.clone(), name);

                match &previous {
                    Some(previous) => {
                        self.index
                            .replace_entry(&mut index, previous.digest(), entry.clone())?
                    }
                    None => self.index.push(&mut index, entry.clone()),
                }
                Ok((lock, index, entry))
            })
            .await?;

        ctx.check()?;
        self.commit(lock, index, HashSet::new()).await?;

        tracing::info!(
            name = %name,
            path = %path.display(),
            digest = %entry.digest(),
            "Artifact layer added"
        );
        Ok(entry.digest().clone())
    }

    /// Delete artifact `name` from the catalog and reclaim the blobs only it
    /// referenced.
    ///
    /// The catalog without the entry is committed first and the blobs are
    /// reclaimed afterwards, both under the exclusive lock. A failure between
    /// the two leaves unreferenced blobs, never an entry pointing at missing
    /// content.
    pub async fn remove(&self, ctx: &OpContext, name: &str) -> Result<()> {
        self.remove_inner(ctx, name)
            .await
            .map_err(|e| e.context("remove", name))
    }

    async fn remove_inner(&self, ctx: &OpContext, name: &str) -> Result<()> {
        let (lock, index, removed, owned) = ctx
            .run(async {
                let lock = self.lock(LockMode::Exclusive).await?;
                let mut index = self.index.load().await?;
                let removed = self.index.remove_by_name(&mut index, name)?;
                let owned = self.exclusive_blobs(&removed, &index).await;
                Ok((lock, index, removed, owned))
            })
            .await?;

        ctx.check()?;
        let reclaimed = self.commit(lock, index, owned).await?;

        tracing::info!(name = %name, digest = %removed.digest(), reclaimed, "Artifact removed");
        Ok(())
    }

    /// Every artifact in catalog order, fully resolved.
    pub async fn list(&self, ctx: &OpContext) -> Result<ArtifactList> {
        ctx.run(async {
            let _lock = self.lock(LockMode::Shared).await?;
            let index = self.index.load().await?;
            let mut artifacts = Vec::with_capacity(index.manifests().len());
            for entry in index.manifests().iter().cloned() {
                artifacts.push(self.resolve_entry(entry).await?);
            }
            Ok(ArtifactList::from(artifacts))
        })
        .await
        .map_err(|e| e.context("list", self.root().display().to_string()))
    }

    /// The artifact named `name`, fully resolved.
    pub async fn inspect(&self, ctx: &OpContext, name: &str) -> Result<Artifact> {
        ctx.run(async {
            let _lock = self.lock(LockMode::Shared).await?;
            let index = self.index.load().await?;
            let (_, entry) = self
                .index
                .find_by_name(&index, name)
                .ok_or_else(|| ArtifactError::NotFound(format!("artifact {}", name)))?;
            self.resolve_entry(entry.clone()).await
        })
        .await
        .map_err(|e| e.context("inspect", name))
    }

    /// Push artifact `name` to the registry reference of the same name.
    pub async fn push(&self, ctx: &OpContext, name: &str) -> Result<()> {
        self.push_to(ctx, name, name).await
    }

    /// Push artifact `name` to `destination` (a registry reference).
    pub async fn push_to(&self, ctx: &OpContext, name: &str, destination: &str) -> Result<()> {
        ctx.run(async {
            let image = ImageReference::parse(destination)?;
            let _lock = self.lock(LockMode::Shared).await?;
            let index = self.index.load().await?;
            if self.index.find_by_name(&index, name).is_none() {
                return Err(ArtifactError::NotFound(format!("artifact {}", name)));
            }

            let src = TransferRef::Layout(self.reference(name));
            let dst = TransferRef::Registry(image);
            self.transport.copy(&src, &dst, &self.config.transfer).await?;
            tracing::info!(name = %name, destination = %dst, "Artifact pushed");
            Ok(())
        })
        .await
        .map_err(|e| e.context("push", name))
    }

    /// Pull registry reference `name` into the store under the same name.
    ///
    /// Nothing becomes visible until the transport commits the complete
    /// tree; a failed or cancelled pull leaves the store as it was.
    pub async fn pull(&self, ctx: &OpContext, name: &str) -> Result<()> {
        ctx.run(async {
            let image = ImageReference::parse(name)?;
            let src = TransferRef::Registry(image);
            let dst = TransferRef::Layout(self.reference(name));
            self.transport.copy(&src, &dst, &self.config.transfer).await?;
            tracing::info!(name = %name, source = %src, "Artifact pulled");
            Ok(())
        })
        .await
        .map_err(|e| e.context("pull", name))
    }

    /// Layout view of artifact `name` in this store.
    pub fn reference(&self, name: &str) -> LayoutReference {
        LayoutReference::new(
            self.storage.clone(),
            name,
            self.config.name_annotation.clone(),
            self.lock_timeout(),
        )
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }

    async fn lock(&self, mode: LockMode) -> Result<CatalogLock> {
        CatalogLock::acquire(self.root(), mode, self.lock_timeout()).await
    }

    /// Save `index`, then delete the `reclaim` blobs, on a task of its own.
    /// Once started the commit finishes even if the caller stops waiting;
    /// the lock is released afterwards. Returns the number of blobs deleted.
    async fn commit(&self, lock: CatalogLock, index: ImageIndex, reclaim: HashSet<String>) -> Result<usize> {
        let manager = self.index.clone();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            manager.save(&index).await?;
            let mut reclaimed = 0usize;
            for digest in &reclaim {
                match storage.delete_blob(digest).await {
                    Ok(()) => reclaimed += 1,
                    Err(e) => {
                        tracing::warn!(digest = %digest, error = %e, "Failed to delete blob")
                    }
                }
            }
            drop(lock);
            Ok::<_, ArtifactError>(reclaimed)
        })
        .await
        .map_err(|e| ArtifactError::Cancelled(format!("catalog commit did not finish: {}", e)))?
    }

    async fn resolve_entry(&self, entry: Descriptor) -> Result<Artifact> {
        let source = LayoutSource::for_entry(self.storage.clone(), entry.clone());
        let manifests = self.resolver.resolve(&source, None).await?;
        Ok(Artifact::new(entry, manifests, self.config.name_annotation.clone()))
    }

    /// Current manifest of an entry that `add` can append to.
    async fn editable_manifest(&self, entry: &Descriptor) -> Result<ImageManifest> {
        if is_index_media_type(entry.media_type()) {
            return Err(ArtifactError::malformed(
                "artifact",
                format!("{} is an index; layers can only be added to a single manifest", entry.digest()),
            ));
        }
        let data = self.storage.read_blob(entry.digest()).await?;
        parse_manifest(&data)
    }

    /// Blobs referenced by `removed` and by no entry left in `index`.
    ///
    /// Any resolution failure keeps everything: reclaiming is best effort,
    /// deleting a shared blob is not.
    async fn exclusive_blobs(&self, removed: &Descriptor, index: &ImageIndex) -> HashSet<String> {
        let source = LayoutSource::for_entry(self.storage.clone(), removed.clone());
        let mut owned = match self.resolver.resolve_tree(&source, None).await {
            Ok(tree) => tree.blob_digests(),
            Err(e) => {
                tracing::warn!(digest = %removed.digest(), error = %e, "Keeping blobs of unresolvable artifact");
                return HashSet::new();
            }
        };

        for entry in index.manifests() {
            let source = LayoutSource::for_entry(self.storage.clone(), entry.clone());
            match self.resolver.resolve_tree(&source, None).await {
                Ok(tree) => {
                    for digest in tree.blob_digests() {
                        owned.remove(&digest);
                    }
                }
                Err(e) => {
                    tracing::warn!(digest = %entry.digest(), error = %e, "Cannot resolve catalog entry, keeping all blobs");
                    return HashSet::new();
                }
            }
        }
        owned
    }

    /// Remove staging leftovers from crashed runs.
    async fn sweep_staging(&self) {
        let staging = self.storage.staging_dir();
        let mut entries = match tokio::fs::read_dir(&staging).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .map(|age| age > STALE_STAGING_AGE)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            let path = entry.path();
            tracing::warn!(path = %path.display(), "Removing stale staging entry");
            let removed = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_digest;
    use a3s_artifact_core::config::TransferOptions;
    use a3s_artifact_core::error::ErrorKind;
    use crate::manifest::{new_index, to_json};
    use a3s_artifact_core::oci::ANNOTATION_TITLE;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Transport that records calls and does nothing else.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn copy(&self, src: &TransferRef, dst: &TransferRef, _: &TransferOptions) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((src.to_string(), dst.to_string()));
            Ok(())
        }
    }

    async fn open_store(tmp: &TempDir) -> ArtifactStore {
        let config = StoreConfig {
            store_path: Some(tmp.path().join("store")),
            lock_timeout_ms: 2_000,
            ..Default::default()
        };
        ArtifactStore::with_transport(config, Arc::new(RecordingTransport::default()))
            .await
            .unwrap()
    }

    fn write_file(tmp: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        assert!(store.root().join("index.json").is_file());
        drop(store);
        let store = open_store(&tmp).await;
        assert!(store.list(&OpContext::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_creates_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let file = write_file(&tmp, "notes.txt", b"hello");

        let digest = store.add(&OpContext::new(), "r:v1", &file, None).await.unwrap();
        let artifact = store.inspect(&OpContext::new(), "r:v1").await.unwrap();

        assert_eq!(artifact.digest(), digest);
        assert_eq!(ArtifactStore::get_name(&artifact).unwrap(), "r:v1");
        assert_eq!(artifact.manifests.len(), 1);
        let layer = &artifact.manifests[0].layers()[0];
        assert_eq!(layer.digest(), &sha256_digest(b"hello"));
        assert_eq!(layer.media_type(), &MediaType::ImageLayer);
        assert_eq!(layer.annotation(ANNOTATION_TITLE), Some("notes.txt"));
    }

    #[tokio::test]
    async fn test_add_with_artifact_type() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let file = write_file(&tmp, "model.bin", b"weights");

        store
            .add(&OpContext::new(), "m", &file, Some("application/x-model"))
            .await
            .unwrap();
        let artifact = store.inspect(&OpContext::new(), "m").await.unwrap();
        assert_eq!(
            artifact.manifests[0].layers()[0].media_type(),
            &MediaType::from("application/x-model")
        );
    }

    #[tokio::test]
    async fn test_add_missing_source_leaves_catalog() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let err = store
            .add(&OpContext::new(), "x", &tmp.path().join("absent"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("add x:"));
        assert!(store.list(&OpContext::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_to_index_artifact_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let index = to_json(&new_index(Vec::new())).unwrap();
        let (digest, size) = store.storage.write_blob(&index).await.unwrap();
        let mut catalog = store.index.load().await.unwrap();
        store.index.push(
            &mut catalog,
            Descriptor::new(MediaType::ImageIndex, size as i64, digest)
                .with_annotation(store.config.name_annotation.clone(), "multi"),
        );
        store.index.save(&catalog).await.unwrap();

        let file = write_file(&tmp, "f", b"1");
        let err = store.add(&OpContext::new(), "multi", &file, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_remove_reclaims_only_exclusive_blobs() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let shared = write_file(&tmp, "shared.txt", b"shared");
        let own = write_file(&tmp, "own.txt", b"own");

        store.add(&OpContext::new(), "keep", &shared, None).await.unwrap();
        store.add(&OpContext::new(), "drop", &shared, None).await.unwrap();
        store.add(&OpContext::new(), "drop", &own, None).await.unwrap();

        store.remove(&OpContext::new(), "drop").await.unwrap();

        assert!(store.storage.has_blob(&sha256_digest(b"shared")).await.unwrap());
        assert!(!store.storage.has_blob(&sha256_digest(b"own")).await.unwrap());
        assert!(store
            .storage
            .has_blob(a3s_artifact_core::oci::EMPTY_JSON_DIGEST)
            .await
            .unwrap());
        assert!(store.inspect(&OpContext::new(), "keep").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let err = store.remove(&OpContext::new(), "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_includes_unnamed_entries() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let file = write_file(&tmp, "f", b"1");
        store.add(&OpContext::new(), "named", &file, None).await.unwrap();

        let mut catalog = store.index.load().await.unwrap();
        let mut unnamed = catalog.manifests()[0].clone();
        unnamed.set_annotations(None);
        store.index.push(&mut catalog, unnamed);
        store.index.save(&catalog).await.unwrap();

        let list = store.list(&OpContext::new()).await.unwrap();
        assert_eq!(list.len(), 2);
        let names: Vec<_> = list.iter().map(|a| a.name().is_ok()).collect();
        assert_eq!(names, vec![true, false]);
        assert_eq!(
            list.iter().nth(1).unwrap().name().unwrap_err().kind(),
            ErrorKind::Unnamed
        );
    }

    #[tokio::test]
    async fn test_push_requires_existing_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let err = store.push(&OpContext::new(), "quay.io/a/b:v1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_push_to_hands_refs_to_transport() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let config = StoreConfig {
            store_path: Some(tmp.path().join("store")),
            ..Default::default()
        };
        let store = ArtifactStore::with_transport(config, transport.clone()).await.unwrap();
        let file = write_file(&tmp, "f", b"1");
        store.add(&OpContext::new(), "local", &file, None).await.unwrap();

        store
            .push_to(&OpContext::new(), "local", "quay.io/org/blob:v2")
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.ends_with(":local"));
        assert_eq!(calls[0].1, "docker://quay.io/org/blob:v2");
    }

    #[tokio::test]
    async fn test_pull_rejects_invalid_reference() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let err = store.pull(&OpContext::new(), "Bad Name").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
    }

    #[tokio::test]
    async fn test_lock_timeout_when_catalog_is_held() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            store_path: Some(tmp.path().join("store")),
            lock_timeout_ms: 50,
            ..Default::default()
        };
        let store = ArtifactStore::with_transport(config, Arc::new(RecordingTransport::default()))
            .await
            .unwrap();
        let file = write_file(&tmp, "f", b"1");

        let _held = CatalogLock::acquire(store.root(), LockMode::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();
        let err = store.add(&OpContext::new(), "x", &file, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
    }

    #[tokio::test]
    async fn test_add_streams_layer_outside_the_lock() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            store_path: Some(tmp.path().join("store")),
            lock_timeout_ms: 50,
            ..Default::default()
        };
        let store = ArtifactStore::with_transport(config, Arc::new(RecordingTransport::default()))
            .await
            .unwrap();
        let file = write_file(&tmp, "layer.bin", b"streamed while locked out");

        let held = CatalogLock::acquire(store.root(), LockMode::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();
        let err = store.add(&OpContext::new(), "x", &file, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        drop(held);

        // The layer is in the pool but nothing references it yet.
        let layer = sha256_digest(b"streamed while locked out");
        assert!(store.storage.has_blob(&layer).await.unwrap());
        assert!(store.list(&OpContext::new()).await.unwrap().is_empty());

        let digest = store.add(&OpContext::new(), "x", &file, None).await.unwrap();
        let artifact = store.inspect(&OpContext::new(), "x").await.unwrap();
        assert_eq!(artifact.digest(), digest);
        assert_eq!(artifact.manifests[0].layers()[0].digest(), &layer);
    }
}
