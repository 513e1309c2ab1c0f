//! Registry-backed [`Transport`].
//!
//! Uses the `oci-distribution` client to move manifest trees between a
//! registry and a local layout. Manifests travel as raw bytes so digests
//! survive the round trip unchanged.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;

use a3s_artifact_core::config::{ResolveLimits, TransferOptions};
use a3s_artifact_core::error::{ArtifactError, Result};
use async_trait::async_trait;
use oci_distribution::client::{
    Certificate, CertificateEncoding, ClientConfig, ClientProtocol,
};
use oci_distribution::manifest::{
    OciDescriptor, IMAGE_MANIFEST_LIST_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use tokio::io::AsyncWriteExt;

use super::credentials::CredentialStore;
use super::reference::ImageReference;
use crate::digest::sha256_digest;
use crate::layout::{LayoutDestination, LayoutReference, LayoutSource};
use crate::manifest::{detect_media_type, Descriptor, ManifestDocument, MediaType};
use crate::resolver::ManifestSource;
use crate::transport::{TransferRef, Transport};

/// Manifest media types accepted from registries.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
];

/// Registry credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, else anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME"),
            std::env::var("REGISTRY_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Pick credentials for `registry`: explicit options, then the
    /// credential file, then the environment, then anonymous.
    pub fn resolve(registry: &str, options: &TransferOptions) -> Self {
        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            return Self::basic(username.clone(), password.clone());
        }

        let store = match &options.auth_file {
            Some(path) => Some(CredentialStore::new(path)),
            None => CredentialStore::default_path().ok(),
        };
        if let Some(store) = store {
            match store.get(registry) {
                Ok(Some((username, password))) => return Self::basic(username, password),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    registry = %registry,
                    path = %store.path().display(),
                    error = %e,
                    "Ignoring unreadable credential file"
                ),
            }
        }

        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// [`Transport`] talking to OCI distribution registries.
#[derive(Debug, Clone, Default)]
pub struct RegistryTransport {
    limits: ResolveLimits,
}

/// A manifest waiting to be pushed, children before parents.
struct PendingManifest {
    digest: String,
    data: Vec<u8>,
    media_type: MediaType,
}

impl RegistryTransport {
    /// Transport that walks remote manifest trees within `limits`.
    pub fn new(limits: ResolveLimits) -> Self {
        Self { limits }
    }

    fn client(&self, options: &TransferOptions) -> Result<Client> {
        let protocol = if options.plain_http {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let extra_root_certificates = match &options.cert_dir {
            Some(dir) => load_certificates(dir)?,
            None => Vec::new(),
        };
        if let Some(decrypt) = &options.decrypt_config {
            tracing::debug!(
                path = %decrypt.display(),
                "Decryption config passed through; layers are stored as transferred"
            );
        }

        Ok(Client::new(ClientConfig {
            protocol,
            accept_invalid_certificates: options.insecure_skip_tls_verify,
            extra_root_certificates,
            ..Default::default()
        }))
    }

    /// Fetch a remote manifest tree into `destination`'s staging area and
    /// commit it under the destination's name.
    async fn pull(
        &self,
        image: &ImageReference,
        destination: &LayoutReference,
        options: &TransferOptions,
    ) -> Result<()> {
        let client = self.client(options)?;
        let auth = RegistryAuth::resolve(&image.registry, options).to_oci_auth();
        let reference = to_oci_reference(image)?;
        let target = image.to_string();
        let mut dest = destination.new_image_destination().await?;

        tracing::info!(reference = %image, name = %destination.name(), "Pulling artifact");

        let (client, auth) = (&client, &auth);
        let root_ref = &reference;
        let (root, _) = with_retries(options, &target, "pull manifest", move || {
            client.pull_manifest_raw(root_ref, auth, ACCEPTED_MANIFEST_TYPES)
        })
        .await?;
        if let Some(pinned) = &image.digest {
            let actual = sha256_digest(&root);
            if &actual != pinned {
                return Err(ArtifactError::Transport {
                    reference: target,
                    message: format!("manifest digest {} does not match {}", actual, pinned),
                });
            }
        }
        let root_type = detect_media_type(&root)?;
        dest.put_manifest(&root, &root_type, true).await?;

        let mut fetched = 1usize;
        let mut pending = vec![(root, root_type, 0usize)];
        while let Some((data, media_type, depth)) = pending.pop() {
            match ManifestDocument::parse(&data, &media_type)? {
                ManifestDocument::Manifest(manifest) => {
                    let blobs = std::iter::once(manifest.config()).chain(manifest.layers().iter());
                    for blob in blobs {
                        self.pull_blob(client, image, blob, &mut dest, options).await?;
                    }
                }
                ManifestDocument::Index(index) => {
                    if depth >= self.limits.max_depth {
                        return Err(ArtifactError::malformed(
                            "manifest tree",
                            format!("{} nests indexes deeper than {}", target, self.limits.max_depth),
                        ));
                    }
                    for child in index.manifests() {
                        if dest.has_blob(child.digest()).await? {
                            continue;
                        }
                        fetched += 1;
                        if fetched > self.limits.max_manifests {
                            return Err(ArtifactError::malformed(
                                "manifest tree",
                                format!("{} has more than {} manifests", target, self.limits.max_manifests),
                            ));
                        }
                        let child_ref = Reference::with_digest(
                            image.registry.clone(),
                            image.repository.clone(),
                            child.digest().clone(),
                        );
                        let child_ref = &child_ref;
                        let (bytes, _) = with_retries(options, &target, "pull manifest", move || {
                            client.pull_manifest_raw(child_ref, auth, ACCEPTED_MANIFEST_TYPES)
                        })
                        .await?;
                        let digest = dest.put_manifest(&bytes, child.media_type(), false).await?;
                        if &digest != child.digest() {
                            return Err(ArtifactError::Transport {
                                reference: target,
                                message: format!(
                                    "child manifest digest {} does not match {}",
                                    digest,
                                    child.digest()
                                ),
                            });
                        }
                        let child_type = detect_media_type(&bytes)?;
                        pending.push((bytes, child_type, depth + 1));
                    }
                }
            }
        }

        let entry = dest.commit().await?;
        tracing::debug!(reference = %image, digest = %entry.digest(), "Pull committed");
        Ok(())
    }

    /// Stream one blob into the destination's staging area, unless the
    /// destination already has it.
    async fn pull_blob(
        &self,
        client: &Client,
        image: &ImageReference,
        blob: &Descriptor,
        dest: &mut LayoutDestination,
        options: &TransferOptions,
    ) -> Result<()> {
        if dest.has_blob(blob.digest()).await? {
            return Ok(());
        }
        let reference = Reference::with_digest(
            image.registry.clone(),
            image.repository.clone(),
            blob.digest().clone(),
        );
        let descriptor = OciDescriptor {
            media_type: blob.media_type().to_string(),
            digest: blob.digest().clone(),
            size: blob.size(),
            ..Default::default()
        };
        let path = dest.blob_staging_path(blob.digest())?;

        tracing::debug!(digest = %blob.digest(), size = blob.size(), "Pulling blob");
        let (reference, descriptor, path) = (&reference, &descriptor, &path);
        with_retries(options, &image.to_string(), "pull blob", move || async move {
            let mut file = tokio::fs::File::create(path).await?;
            client.pull_blob(reference, descriptor, &mut file).await?;
            file.flush().await?;
            Ok::<_, oci_distribution::errors::OciDistributionError>(())
        })
        .await?;
        dest.finish_blob(blob.digest()).await
    }

    /// Upload a committed artifact: blobs first, then manifests with
    /// children ahead of the indexes that list them.
    async fn push(
        &self,
        source_ref: &LayoutReference,
        image: &ImageReference,
        options: &TransferOptions,
    ) -> Result<()> {
        let source = source_ref.new_image_source().await?;
        let (manifests, blobs) = self.collect(&source).await?;

        let client = self.client(options)?;
        let auth = RegistryAuth::resolve(&image.registry, options).to_oci_auth();
        let reference = to_oci_reference(image)?;
        let target = image.to_string();

        tracing::info!(name = %source_ref.name(), reference = %image, "Pushing artifact");

        let (client, auth, push_ref) = (&client, &auth, &reference);
        with_retries(options, &target, "authenticate", move || {
            client.auth(push_ref, auth, RegistryOperation::Push)
        })
        .await?;

        for blob in &blobs {
            let data = source.get_blob(blob.digest()).await?;
            tracing::debug!(digest = %blob.digest(), size = data.len(), "Pushing blob");
            let (data, digest) = (&data, blob.digest());
            with_retries(options, &target, "push blob", move || {
                client.push_blob(push_ref, data, digest)
            })
            .await?;
        }

        let root_digest = source.root_descriptor().digest().clone();
        for manifest in manifests {
            let content_type = http::HeaderValue::from_str(&manifest.media_type.to_string()).map_err(|e| {
                ArtifactError::malformed("manifest", format!("media type header: {}", e))
            })?;
            let manifest_ref = if manifest.digest == root_digest {
                reference.clone()
            } else {
                Reference::with_digest(
                    image.registry.clone(),
                    image.repository.clone(),
                    manifest.digest.clone(),
                )
            };
            let (manifest_ref, body, content_type) = (&manifest_ref, &manifest.data, &content_type);
            with_retries(options, &target, "push manifest", move || {
                client.push_manifest_raw(manifest_ref, body.clone(), content_type.clone())
            })
            .await?;
        }

        tracing::debug!(reference = %image, digest = %root_digest, "Push finished");
        Ok(())
    }

    /// Walk a local manifest tree, returning manifests in upload order and
    /// the distinct blobs they reference.
    async fn collect(&self, source: &LayoutSource) -> Result<(Vec<PendingManifest>, Vec<Descriptor>)> {
        let root = source.root_descriptor().digest().clone();
        let mut order = Vec::new();
        let mut blobs = Vec::new();
        let mut seen_blobs = HashSet::new();
        let mut seen_manifests = HashSet::from([root.clone()]);

        // An index is pushed back with its content once its children are
        // queued, so it pops again after all of them.
        let mut stack: Vec<(String, usize, Option<PendingManifest>)> = vec![(root, 0, None)];
        while let Some((digest, depth, expanded)) = stack.pop() {
            if let Some(index) = expanded {
                order.push(index);
                continue;
            }

            let (data, media_type) = source.get_manifest(Some(&digest)).await?;
            match ManifestDocument::parse(&data, &media_type)? {
                ManifestDocument::Manifest(manifest) => {
                    let referenced = std::iter::once(manifest.config()).chain(manifest.layers().iter());
                    for blob in referenced {
                        if seen_blobs.insert(blob.digest().clone()) {
                            blobs.push(blob.clone());
                        }
                    }
                    order.push(PendingManifest {
                        digest,
                        data,
                        media_type,
                    });
                }
                ManifestDocument::Index(index) => {
                    if depth >= self.limits.max_depth {
                        return Err(ArtifactError::malformed(
                            "manifest tree",
                            format!("index {} nested deeper than {}", digest, self.limits.max_depth),
                        ));
                    }
                    let pending = PendingManifest {
                        digest: digest.clone(),
                        data,
                        media_type,
                    };
                    stack.push((digest, depth, Some(pending)));
                    for child in index.manifests().iter().rev() {
                        if !seen_manifests.insert(child.digest().clone()) {
                            continue;
                        }
                        if seen_manifests.len() > self.limits.max_manifests {
                            return Err(ArtifactError::malformed(
                                "manifest tree",
                                format!("more than {} manifests", self.limits.max_manifests),
                            ));
                        }
                        stack.push((child.digest().clone(), depth + 1, None));
                    }
                }
            }
        }
        Ok((order, blobs))
    }
}

#[async_trait]
impl Transport for RegistryTransport {
    async fn copy(&self, src: &TransferRef, dst: &TransferRef, options: &TransferOptions) -> Result<()> {
        match (src, dst) {
            (TransferRef::Registry(image), TransferRef::Layout(layout)) => {
                self.pull(image, layout, options).await
            }
            (TransferRef::Layout(layout), TransferRef::Registry(image)) => {
                self.push(layout, image, options).await
            }
            _ => Err(ArtifactError::ConfigError(format!(
                "unsupported copy from {} to {}",
                src, dst
            ))),
        }
    }
}

fn to_oci_reference(image: &ImageReference) -> Result<Reference> {
    let text = image.to_string();
    text.parse::<Reference>()
        .map_err(|e| ArtifactError::InvalidReference(format!("{}: {}", text, e)))
}

/// PEM certificates (`*.crt`, `*.pem`) found directly in `dir`.
fn load_certificates(dir: &Path) -> Result<Vec<Certificate>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ArtifactError::io(dir, e))?;
    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .map(|ext| ext == "crt" || ext == "pem")
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let data = std::fs::read(&path).map_err(|e| ArtifactError::io(&path, e))?;
            Ok(Certificate {
                encoding: CertificateEncoding::Pem,
                data,
            })
        })
        .collect()
}

/// Run `op` up to `max_retries + 1` times, pausing `retry_delay` between
/// attempts. The final failure becomes a `Transport` error.
async fn with_retries<T, E, F, Fut>(
    options: &TransferOptions,
    reference: &str,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = options.max_retries().saturating_add(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    reference = %reference,
                    attempt,
                    error = %e,
                    "{} failed, retrying", what
                );
                tokio::time::sleep(options.retry_delay()).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(ArtifactError::Transport {
                    reference: reference.to_string(),
                    message: format!("{}: {}", what, e),
                })
            }
        }
    }
}
