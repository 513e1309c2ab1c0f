//! OCI documents.
//!
//! Manifests, indexes and descriptors are the `oci_spec::image` types; this
//! module adds the annotation helpers, constructors and parsing the store
//! needs on top of them.

use a3s_artifact_core::error::{ArtifactError, Result};
use a3s_artifact_core::oci::{is_index_media_type, is_manifest_media_type, EMPTY_JSON, EMPTY_JSON_DIGEST};
use serde::Serialize;

pub use oci_spec::image::{
    Descriptor, DescriptorBuilder, ImageIndex, ImageIndexBuilder, ImageManifest,
    ImageManifestBuilder, MediaType, SCHEMA_VERSION,
};

/// Annotation access on descriptors.
pub trait DescriptorExt: Sized {
    /// Value of annotation `key`, if present.
    fn annotation(&self, key: &str) -> Option<&str>;

    fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>);

    /// Builder-style [`set_annotation`](Self::set_annotation).
    fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_annotation(key, value);
        self
    }
}

impl DescriptorExt for Descriptor {
    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().as_ref()?.get(key).map(String::as_str)
    }

    fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let mut annotations = self.annotations().clone().unwrap_or_default();
        annotations.insert(key.into(), value.into());
        self.set_annotations(Some(annotations));
    }
}

/// Descriptor of the empty JSON config blob.
pub fn empty_config_descriptor() -> Descriptor {
    Descriptor::new(MediaType::EmptyJSON, EMPTY_JSON.len() as i64, EMPTY_JSON_DIGEST)
}

/// A manifest with no layers and the empty JSON config.
pub fn empty_artifact_manifest() -> Result<ImageManifest> {
    Ok(ImageManifestBuilder::default()
        .schema_version(SCHEMA_VERSION)
        .media_type(MediaType::ImageManifest)
        .config(empty_config_descriptor())
        .layers(Vec::<Descriptor>::new())
        .build()?)
}

/// An OCI index over `manifests`. Also the shape of the store catalog.
pub fn new_index(manifests: Vec<Descriptor>) -> ImageIndex {
    let mut index = ImageIndex::default();
    index.set_media_type(Some(MediaType::ImageIndex));
    index.set_manifests(manifests);
    index
}

/// Sum of a manifest's layer sizes.
pub fn layers_size(manifest: &ImageManifest) -> i64 {
    manifest.layers().iter().map(Descriptor::size).sum()
}

pub fn parse_manifest(data: &[u8]) -> Result<ImageManifest> {
    serde_json::from_slice(data).map_err(|e| ArtifactError::malformed("manifest", e.to_string()))
}

pub fn parse_index(data: &[u8]) -> Result<ImageIndex> {
    serde_json::from_slice(data).map_err(|e| ArtifactError::malformed("index", e.to_string()))
}

/// Serialize a document to the bytes that get stored and hashed.
pub fn to_json<T: Serialize>(document: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

/// Determine the media type of a raw manifest document.
///
/// An explicit `mediaType` wins; otherwise the shape decides (`manifests`
/// means index, `config`/`layers` means manifest).
pub fn detect_media_type(data: &[u8]) -> Result<MediaType> {
    let document: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| ArtifactError::malformed("manifest", e.to_string()))?;

    if let Some(media_type) = document
        .get("mediaType")
        .and_then(serde_json::Value::as_str)
        .filter(|media_type| !media_type.is_empty())
    {
        return Ok(MediaType::from(media_type));
    }
    if document.get("manifests").is_some() {
        Ok(MediaType::ImageIndex)
    } else if document.get("config").is_some() || document.get("layers").is_some() {
        Ok(MediaType::ImageManifest)
    } else {
        Err(ArtifactError::malformed(
            "manifest",
            "document has neither a mediaType nor a recognizable shape",
        ))
    }
}

/// A parsed manifest document.
#[derive(Debug, Clone)]
pub enum ManifestDocument {
    Manifest(ImageManifest),
    Index(ImageIndex),
}

impl ManifestDocument {
    /// Parse raw bytes according to their media type.
    pub fn parse(data: &[u8], media_type: &MediaType) -> Result<Self> {
        if is_index_media_type(media_type) {
            Ok(ManifestDocument::Index(parse_index(data)?))
        } else if is_manifest_media_type(media_type) {
            Ok(ManifestDocument::Manifest(parse_manifest(data)?))
        } else {
            Err(ArtifactError::malformed(
                "manifest",
                format!("unexpected media type '{}'", media_type),
            ))
        }
    }
}
