//! Registry credential file.
//!
//! A JSON document mapping registry hosts to username/password pairs,
//! read when `TransferOptions.auth_file` is set (or from the default
//! `~/.a3s/auth/credentials.json`):
//!
//! ```json
//! {"registries": {"quay.io": {"username": "bot", "password": "s3cret"}}}
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_artifact_core::error::{ArtifactError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Credential {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: HashMap<String, Credential>,
}

/// Per-registry username/password lookup backed by one JSON file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.a3s/auth/credentials.json`.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ArtifactError::ConfigError("cannot determine home directory".to_string())
        })?;
        Ok(Self::new(home.join(".a3s").join("auth").join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Credentials for `registry` as `(username, password)`.
    ///
    /// Hosts compare case-insensitively and Docker Hub aliases match each
    /// other.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let wanted = registry_key(registry);
        Ok(self
            .read()?
            .registries
            .into_iter()
            .find(|(host, _)| registry_key(host) == wanted)
            .map(|(_, c)| (c.username, c.password)))
    }

    fn read(&self) -> Result<CredentialFile> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::default())
            }
            Err(e) => return Err(ArtifactError::io(&self.path, e)),
        };
        serde_json::from_slice(&data).map_err(|e| {
            ArtifactError::ConfigError(format!("credential file {}: {}", self.path.display(), e))
        })
    }
}

/// Canonical key for a registry host; Docker Hub aliases collapse.
fn registry_key(registry: &str) -> String {
    let host = registry.trim().to_ascii_lowercase();
    match host.as_str() {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        _ => host,
    }
}
