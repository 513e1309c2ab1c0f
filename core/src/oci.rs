//! OCI media types and annotation keys used throughout the artifact store.

pub use oci_spec::image::{MediaType, ANNOTATION_REF_NAME, ANNOTATION_TITLE};

/// Docker schema 2 manifest.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Content of the empty JSON blob (`{}`).
pub const EMPTY_JSON: &[u8] = b"{}";

/// Digest of [`EMPTY_JSON`].
pub const EMPTY_JSON_DIGEST: &str =
    "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// Default media type of a file layer added to an artifact.
pub fn default_layer_media_type() -> MediaType {
    MediaType::ImageLayer
}

/// Whether a media type denotes an index / manifest list.
pub fn is_index_media_type(media_type: &MediaType) -> bool {
    match media_type {
        MediaType::ImageIndex => true,
        MediaType::Other(other) => other == MEDIA_TYPE_DOCKER_MANIFEST_LIST,
        _ => false,
    }
}

/// Whether a media type denotes a single image manifest.
pub fn is_manifest_media_type(media_type: &MediaType) -> bool {
    match media_type {
        MediaType::ImageManifest => true,
        MediaType::Other(other) => other == MEDIA_TYPE_DOCKER_MANIFEST,
        _ => false,
    }
}
