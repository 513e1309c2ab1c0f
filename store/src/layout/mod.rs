//! OCI image layout backend.
//!
//! ```text
//! <root>/
//! ├── oci-layout            {"imageLayoutVersion":"1.0.0"}
//! ├── index.json            catalog
//! ├── .lock                 advisory catalog lock
//! ├── .staging/             in-flight blob writes and pulls
//! └── blobs/
//!     └── sha256/<hex>      content-addressed blobs
//! ```
//!
//! Every blob write lands in `.staging` first and is renamed into place
//! after `fsync`, so a blob path either holds complete content or does not
//! exist. Staging lives on the same filesystem as `blobs/` which keeps the
//! final rename atomic.

mod reference;

pub use reference::{LayoutDestination, LayoutReference, LayoutSource};

use std::path::{Path, PathBuf};

use a3s_artifact_core::error::{ArtifactError, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::digest::{sha256_digest, split_digest, DigestWriter};
use crate::manifest::ImageIndex;

/// Catalog file name.
pub const INDEX_FILE: &str = "index.json";

/// Layout marker file name.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

/// Staging directory name.
pub const STAGING_DIR: &str = ".staging";

const OCI_LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;

/// Read buffer size used when streaming files into the blob pool.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Persistence backend for the catalog and the blob pool.
///
/// The store only talks to storage through this trait; swapping the on-disk
/// representation does not touch add/list/remove logic.
#[async_trait]
pub trait LayoutStorage: Send + Sync {
    /// Store root directory.
    fn root(&self) -> &Path;

    /// Directory for in-flight writes. Same filesystem as the blob pool.
    fn staging_dir(&self) -> PathBuf;

    /// Read the catalog. `None` when it has never been written.
    async fn load_index(&self) -> Result<Option<ImageIndex>>;

    /// Atomically replace the catalog.
    async fn save_index(&self, index: &ImageIndex) -> Result<()>;

    /// Store bytes as a blob, returning `(digest, size)`.
    async fn write_blob(&self, data: &[u8]) -> Result<(String, u64)>;

    /// Stream a local file into the blob pool, returning `(digest, size)`.
    async fn write_blob_from_file(&self, path: &Path) -> Result<(String, u64)>;

    /// Move an already verified staged file into the blob pool under `digest`.
    async fn import_blob(&self, staged: &Path, digest: &str) -> Result<()>;

    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>>;

    /// Delete a blob. Missing blobs are not an error.
    async fn delete_blob(&self, digest: &str) -> Result<()>;

    async fn has_blob(&self, digest: &str) -> Result<bool>;

    /// Filesystem path a blob lives at.
    fn blob_path(&self, digest: &str) -> Result<PathBuf>;
}

/// Filesystem OCI layout.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Open the layout at `root`, creating directories and the layout
    /// marker when absent. Idempotent.
    pub async fn open(root: &Path) -> Result<Self> {
        for dir in [root.join("blobs").join("sha256"), root.join(STAGING_DIR)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ArtifactError::io(&dir, e))?;
        }

        let marker = root.join(OCI_LAYOUT_FILE);
        if !path_exists(&marker).await? {
            tokio::fs::write(&marker, OCI_LAYOUT_CONTENT)
                .await
                .map_err(|e| ArtifactError::io(&marker, e))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Layout handle that touches nothing on disk.
    #[cfg(test)]
    pub(crate) fn open_unchecked(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Unique temp path inside the staging directory, removed on drop.
    fn temp_path(&self, prefix: &str) -> Result<tempfile::TempPath> {
        let staging = self.staging_dir();
        tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&staging)
            .map(|f| f.into_temp_path())
            .map_err(|e| ArtifactError::io(&staging, e))
    }

    /// Rename a complete staged file to its blob path. An existing blob
    /// with the same digest is kept and the staged copy discarded.
    async fn publish(&self, staged: &Path, digest: &str) -> Result<()> {
        let target = self.blob_path(digest)?;
        if path_exists(&target).await? {
            tracing::debug!(digest = %digest, "Blob already present, coalescing");
            let _ = tokio::fs::remove_file(staged).await;
            return Ok(());
        }
        tokio::fs::rename(staged, &target)
            .await
            .map_err(|e| ArtifactError::io(&target, e))
    }
}

#[async_trait]
impl LayoutStorage for OciLayout {
    fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    async fn load_index(&self) -> Result<Option<ImageIndex>> {
        let path = self.index_path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArtifactError::io(&path, e)),
        };
        serde_json::from_slice::<ImageIndex>(&data)
            .map(Some)
            .map_err(|e| ArtifactError::malformed(INDEX_FILE, e.to_string()))
    }

    async fn save_index(&self, index: &ImageIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        let path = self.index_path();

        let tmp = tempfile::Builder::new()
            .prefix(".index.json.")
            .tempfile_in(&self.root)
            .map_err(|e| ArtifactError::io(&self.root, e))?
            .into_temp_path();
        write_synced(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ArtifactError::io(&path, e))?;
        Ok(())
    }

    async fn write_blob(&self, data: &[u8]) -> Result<(String, u64)> {
        let digest = sha256_digest(data);
        if self.has_blob(&digest).await? {
            return Ok((digest, data.len() as u64));
        }
        let tmp = self.temp_path("blob-")?;
        write_synced(&tmp, data).await?;
        self.publish(&tmp, &digest).await?;
        Ok((digest, data.len() as u64))
    }

    async fn write_blob_from_file(&self, path: &Path) -> Result<(String, u64)> {
        let mut source = tokio::fs::File::open(path)
            .await
            .map_err(|e| ArtifactError::io(path, e))?;

        let tmp = self.temp_path("blob-")?;
        let tmp_path = tmp.to_path_buf();
        let mut out = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ArtifactError::io(&tmp_path, e))?;

        let mut hasher = DigestWriter::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| ArtifactError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])
                .await
                .map_err(|e| ArtifactError::io(&tmp_path, e))?;
        }
        out.sync_all()
            .await
            .map_err(|e| ArtifactError::io(&tmp_path, e))?;
        drop(out);

        let (digest, size) = hasher.finish();
        self.publish(&tmp, &digest).await?;
        tracing::debug!(path = %path.display(), digest = %digest, size, "Blob written");
        Ok((digest, size))
    }

    async fn import_blob(&self, staged: &Path, digest: &str) -> Result<()> {
        self.blob_path(digest)?;
        let file = tokio::fs::File::open(staged)
            .await
            .map_err(|e| ArtifactError::io(staged, e))?;
        file.sync_all()
            .await
            .map_err(|e| ArtifactError::io(staged, e))?;
        self.publish(staged, digest).await
    }

    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(format!("blob {}", digest)))
            }
            Err(e) => Err(ArtifactError::io(&path, e)),
        }
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        let path = self.blob_path(digest)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::io(&path, e)),
        }
    }

    async fn has_blob(&self, digest: &str) -> Result<bool> {
        path_exists(&self.blob_path(digest)?).await
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, encoded) = split_digest(digest)?;
        Ok(self.root.join("blobs").join(algorithm).join(encoded))
    }
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| ArtifactError::io(path, e))
}

/// Write `data` to `path` and flush it to disk.
async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ArtifactError::io(path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| ArtifactError::io(path, e))?;
    file.sync_all().await.map_err(|e| ArtifactError::io(path, e))
}
