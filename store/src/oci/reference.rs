//! Registry reference parsing.
//!
//! Turns names like `quay.io/org/blob:v1` or `busybox` into registry,
//! repository, tag and digest parts, applying Docker Hub conventions.

use std::str::FromStr;

use a3s_artifact_core::error::{ArtifactError, Result};

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// Parsed registry reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, optionally with port (`quay.io`, `localhost:5000`)
    pub registry: String,
    /// Repository path (`org/blob`, `library/busybox`)
    pub repository: String,
    /// Tag; defaults to `latest` when neither tag nor digest is given
    pub tag: Option<String>,
    /// Manifest digest (`sha256:...`)
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference.
    ///
    /// ```text
    /// busybox                      -> docker.io/library/busybox:latest
    /// org/blob:v1                  -> docker.io/org/blob:v1
    /// quay.io/org/blob             -> quay.io/org/blob:latest
    /// localhost:5000/blob@sha256:… -> localhost:5000/blob@sha256:…
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ArtifactError::InvalidReference(
                "empty reference".to_string(),
            ));
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .map(|(algo, hex)| !algo.is_empty() && !hex.is_empty())
                    .unwrap_or(false);
                if !valid {
                    return Err(ArtifactError::InvalidReference(format!(
                        "'{}': digest must be <algorithm>:<hex>",
                        input
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A tag can only follow the last path component; a colon before
        // that belongs to a registry port.
        let last_component = remainder.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match remainder[last_component..].rfind(':') {
            Some(offset) => {
                let split = last_component + offset;
                (&remainder[..split], Some(remainder[split + 1..].to_string()))
            }
            None => (remainder, None),
        };
        if tag.as_deref() == Some("") {
            return Err(ArtifactError::InvalidReference(format!(
                "'{}': empty tag",
                input
            )));
        }

        let (registry, repository) = split_registry(name).ok_or_else(|| {
            ArtifactError::InvalidReference(format!("'{}': empty repository", input))
        })?;
        if repository
            .chars()
            .any(|c| c.is_ascii_uppercase() || c.is_whitespace())
        {
            return Err(ArtifactError::InvalidReference(format!(
                "'{}': repository must be lowercase without spaces",
                input
            )));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Same repository, addressed by `digest` instead of a tag.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

/// Split `name` into registry and repository. The first component is a
/// registry when it looks like a host (has a dot or port, or is
/// `localhost`).
fn split_registry(name: &str) -> Option<(String, String)> {
    if name.is_empty() {
        return None;
    }
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return None;
            }
            return Some((first.to_string(), rest.to_string()));
        }
    }
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Some((DEFAULT_REGISTRY.to_string(), repository))
}

impl FromStr for ImageReference {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_artifact_core::error::ErrorKind;

    const DIGEST: &str = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    #[test]
    fn test_bare_name_uses_docker_hub() {
        let r = ImageReference::parse("busybox").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/busybox");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert!(r.digest.is_none());
    }

    #[test]
    fn test_user_repository_with_tag() {
        let r = ImageReference::parse("org/blob:v1").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "org/blob");
        assert_eq!(r.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_explicit_registry() {
        let r = ImageReference::parse("quay.io/org/sub/blob:2.0").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "org/sub/blob");
        assert_eq!(r.tag.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let r = ImageReference::parse("localhost:5000/blob").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "blob");
        assert_eq!(r.tag.as_deref(), Some("latest"));

        let r = ImageReference::parse("registry.local:5000/blob:v2").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.tag.as_deref(), Some("v2"));
    }

    #[test]
    fn test_digest_without_tag() {
        let r = ImageReference::parse(&format!("quay.io/org/blob@{}", DIGEST)).unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_tag_and_digest() {
        let r = ImageReference::parse(&format!("quay.io/org/blob:v1@{}", DIGEST)).unwrap();
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert_eq!(r.to_string(), format!("quay.io/org/blob:v1@{}", DIGEST));
    }

    #[test]
    fn test_invalid_references() {
        for input in ["", "   ", "blob@nodigest", "quay.io/", "blob:", "quay.io/Org/blob"] {
            let err = ImageReference::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidReference, "input {:?}", input);
        }
    }

    #[test]
    fn test_with_digest_drops_tag() {
        let r = ImageReference::parse("quay.io/org/blob:v1").unwrap();
        let pinned = r.with_digest(DIGEST);
        assert_eq!(pinned.tag, None);
        assert_eq!(pinned.to_string(), format!("quay.io/org/blob@{}", DIGEST));
        assert_eq!(pinned.repository_path(), "quay.io/org/blob");
    }

    #[test]
    fn test_from_str_and_display() {
        let r: ImageReference = " registry/x:latest ".parse().unwrap();
        assert_eq!(r.to_string(), "docker.io/registry/x:latest");
    }
}
