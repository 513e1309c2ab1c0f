use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ArtifactError, Result};
use crate::oci::{default_layer_media_type, ANNOTATION_REF_NAME};

/// Environment variable overriding the store root.
pub const ENV_STORE_PATH: &str = "A3S_ARTIFACT_STORE";

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root; `None` means `~/.a3s/artifacts`
    pub store_path: Option<PathBuf>,

    /// Annotation key holding the artifact name on catalog entries
    pub name_annotation: String,

    /// Layer media type used when `add` is given no explicit type
    pub layer_media_type: String,

    /// How long to wait for the catalog lock before failing
    pub lock_timeout_ms: u64,

    /// Bounds on manifest tree resolution
    pub resolve: ResolveLimits,

    /// Options handed to the transport on push/pull
    pub transfer: TransferOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            name_annotation: ANNOTATION_REF_NAME.to_string(),
            layer_media_type: default_layer_media_type().to_string(),
            lock_timeout_ms: 30_000,
            resolve: ResolveLimits::default(),
            transfer: TransferOptions::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: StoreConfig = if is_json {
            serde_json::from_str(&data).map_err(|e| {
                ArtifactError::ConfigError(format!("{}: {}", path.display(), e))
            })?
        } else {
            serde_yaml::from_str(&data).map_err(|e| {
                ArtifactError::ConfigError(format!("{}: {}", path.display(), e))
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `A3S_ARTIFACT_STORE`, `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(ENV_STORE_PATH) {
            if !path.trim().is_empty() {
                self.store_path = Some(PathBuf::from(path));
            }
        }
        if self.transfer.username.is_none() && self.transfer.password.is_none() {
            if let (Ok(username), Ok(password)) = (
                std::env::var("REGISTRY_USERNAME"),
                std::env::var("REGISTRY_PASSWORD"),
            ) {
                self.transfer.username = Some(username);
                self.transfer.password = Some(password);
            }
        }
        self
    }

    /// Resolved store root.
    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }

    /// Reject configurations the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.name_annotation.trim().is_empty() {
            return Err(ArtifactError::ConfigError(
                "name_annotation must not be empty".to_string(),
            ));
        }
        if self.layer_media_type.trim().is_empty() {
            return Err(ArtifactError::ConfigError(
                "layer_media_type must not be empty".to_string(),
            ));
        }
        if self.resolve.max_depth == 0 || self.resolve.max_manifests == 0 {
            return Err(ArtifactError::ConfigError(
                "resolve limits must be greater than zero".to_string(),
            ));
        }
        if self.transfer.username.is_some() != self.transfer.password.is_some() {
            return Err(ArtifactError::ConfigError(
                "transfer username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Return the default store root (`~/.a3s/artifacts`).
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
        .join("artifacts")
}

/// Bounds applied when walking manifest trees from untrusted sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveLimits {
    /// Maximum index nesting depth (a plain manifest is depth 0)
    pub max_depth: usize,

    /// Maximum number of manifests fetched for one artifact
    pub max_manifests: usize,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_manifests: 1024,
        }
    }
}

/// Pass-through configuration for the remote transport.
///
/// The store never interprets these; the transport owns retries, TLS and
/// credential handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Credential file (per-registry username/password JSON)
    pub auth_file: Option<PathBuf>,

    /// Explicit registry username
    pub username: Option<String>,

    /// Explicit registry password
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Directory of extra PEM root certificates (`*.crt`, `*.pem`)
    pub cert_dir: Option<PathBuf>,

    /// Accept invalid TLS certificates
    pub insecure_skip_tls_verify: bool,

    /// Talk plain HTTP to the registry
    pub plain_http: bool,

    /// Retries per network call after the first attempt
    pub max_retries: Option<u32>,

    /// Pause between retries in milliseconds
    pub retry_delay_ms: Option<u64>,

    /// Decryption configuration, passed through untouched
    pub decrypt_config: Option<PathBuf>,
}

impl TransferOptions {
    /// Default number of retries.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default pause between retries.
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms.unwrap_or(Self::DEFAULT_RETRY_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.name_annotation, "org.opencontainers.image.ref.name");
        assert_eq!(config.layer_media_type, "application/vnd.oci.image.layer.v1.tar");
        assert_eq!(config.lock_timeout_ms, 30_000);
        assert_eq!(config.resolve, ResolveLimits::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_path_default_ends_with_artifacts() {
        let config = StoreConfig::default();
        assert!(config.store_path().ends_with(".a3s/artifacts"));
    }

    #[test]
    fn test_store_path_override() {
        let config = StoreConfig {
            store_path: Some(PathBuf::from("/srv/artifacts")),
            ..Default::default()
        };
        assert_eq!(config.store_path(), PathBuf::from("/srv/artifacts"));
    }

    #[test]
    fn test_from_yaml_file_partial() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.yaml");
        std::fs::write(
            &path,
            "store_path: /data/artifacts\nlock_timeout_ms: 500\ntransfer:\n  max_retries: 7\n",
        )
        .unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/data/artifacts")));
        assert_eq!(config.lock_timeout_ms, 500);
        assert_eq!(config.transfer.max_retries(), 7);
        // Untouched fields keep their defaults
        assert_eq!(config.name_annotation, ANNOTATION_REF_NAME);
        assert_eq!(config.resolve.max_depth, 8);
    }

    #[test]
    fn test_from_json_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, r#"{"name_annotation":"io.example.name"}"#).unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.name_annotation, "io.example.name");
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.yaml");
        std::fs::write(&path, "name_annotation: \"\"\n").unwrap();

        let err = StoreConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::ConfigError(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let tmp = TempDir::new().unwrap();
        let err = StoreConfig::from_file(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn test_validate_half_credentials() {
        let mut config = StoreConfig::default();
        config.transfer.username = Some("user".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transfer_defaults() {
        let options = TransferOptions::default();
        assert_eq!(options.max_retries(), 3);
        assert_eq!(options.retry_delay(), std::time::Duration::from_secs(1));
        assert!(!options.insecure_skip_tls_verify);
    }

    #[test]
    fn test_password_not_serialized() {
        let options = TransferOptions {
            username: Some("u".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(!json.contains("secret"));
    }
}
