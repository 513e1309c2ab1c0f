//! Layer writes for `add`.

use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;

use a3s_artifact_core::error::{ArtifactError, Result};
use a3s_artifact_core::oci::{ANNOTATION_TITLE, EMPTY_JSON};

use crate::layout::LayoutStorage;
use crate::manifest::{to_json, Descriptor, DescriptorExt, ImageManifest, MediaType};

/// Streams files into the blob pool and publishes updated manifests.
#[derive(Clone)]
pub struct BlobWriter {
    storage: Arc<dyn LayoutStorage>,
}

impl BlobWriter {
    pub fn new(storage: Arc<dyn LayoutStorage>) -> Self {
        Self { storage }
    }

    /// Check that `path` is an existing regular file.
    pub async fn check_source(path: &Path) -> Result<Metadata> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(format!(
                    "source file {}",
                    path.display()
                )))
            }
            Err(e) => return Err(ArtifactError::io(path, e)),
        };
        if !metadata.is_file() {
            return Err(ArtifactError::NotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(metadata)
    }

    /// Stream `path` into the blob pool as a layer of `media_type`, titled
    /// with the file's base name.
    pub async fn write_layer(&self, path: &Path, media_type: MediaType) -> Result<Descriptor> {
        Self::check_source(path).await?;
        let (digest, size) = self.storage.write_blob_from_file(path).await?;

        let mut layer = Descriptor::new(media_type, size as i64, digest);
        if let Some(title) = path.file_name() {
            layer.set_annotation(ANNOTATION_TITLE, title.to_string_lossy());
        }
        Ok(layer)
    }

    /// Make sure the empty JSON config blob exists.
    pub async fn ensure_empty_config(&self) -> Result<()> {
        self.storage.write_blob(EMPTY_JSON).await?;
        Ok(())
    }

    /// Append `layer` to `manifest` and store the result.
    ///
    /// Returns the descriptor of the stored manifest; its digest always
    /// differs from the manifest's previous digest.
    pub async fn append_layer(&self, manifest: &mut ImageManifest, layer: Descriptor) -> Result<Descriptor> {
        manifest.layers_mut().push(layer);
        let data = to_json(manifest)?;
        let (digest, size) = self.storage.write_blob(&data).await?;
        let media_type = manifest
            .media_type()
            .clone()
            .unwrap_or(MediaType::ImageManifest);

        let mut descriptor = Descriptor::new(media_type, size as i64, digest);
        descriptor.set_artifact_type(manifest.artifact_type().clone());
        Ok(descriptor)
    }
}
