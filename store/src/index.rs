//! Catalog (`index.json`) management.
//!
//! The catalog is the only authority on which artifacts exist. Every
//! mutation is load, edit in memory, then [`IndexManager::save`]; callers
//! hold the exclusive catalog lock across the whole sequence.

use std::sync::Arc;

use a3s_artifact_core::error::{ArtifactError, Result};

use crate::layout::LayoutStorage;
use crate::manifest::{new_index, Descriptor, DescriptorExt, ImageIndex};

/// Loads, saves and edits the store catalog.
#[derive(Clone)]
pub struct IndexManager {
    storage: Arc<dyn LayoutStorage>,
    name_annotation: String,
}

impl IndexManager {
    pub fn new(storage: Arc<dyn LayoutStorage>, name_annotation: impl Into<String>) -> Self {
        Self {
            storage,
            name_annotation: name_annotation.into(),
        }
    }

    /// Annotation key that names catalog entries.
    pub fn name_annotation(&self) -> &str {
        &self.name_annotation
    }

    /// Read the catalog, writing an empty one on first use.
    ///
    /// An unreadable or unparsable catalog is an error; it is never replaced
    /// with an empty one.
    pub async fn load(&self) -> Result<ImageIndex> {
        match self.storage.load_index().await? {
            Some(index) => Ok(index),
            None => {
                let index = new_index(Vec::new());
                self.save(&index).await?;
                tracing::debug!(root = %self.storage.root().display(), "Initialized empty catalog");
                Ok(index)
            }
        }
    }

    /// Persist the catalog atomically.
    pub async fn save(&self, index: &ImageIndex) -> Result<()> {
        self.storage.save_index(index).await
    }

    /// Name of a catalog entry, if it carries one.
    pub fn entry_name<'a>(&self, descriptor: &'a Descriptor) -> Option<&'a str> {
        descriptor.annotation(&self.name_annotation)
    }

    /// Position and descriptor of the first entry named `name`.
    pub fn find_by_name<'a>(&self, index: &'a ImageIndex, name: &str) -> Option<(usize, &'a Descriptor)> {
        index
            .manifests()
            .iter()
            .enumerate()
            .find(|(_, desc)| self.entry_name(desc) == Some(name))
    }

    /// Overwrite the entry whose digest equals `old_digest` with `new_entry`.
    ///
    /// Several names may point at the same manifest digest; when one of
    /// them matches `new_entry`'s name that entry wins, otherwise the first
    /// digest match is replaced.
    pub fn replace_entry(&self, index: &mut ImageIndex, old_digest: &str, new_entry: Descriptor) -> Result<()> {
        let new_name = self.entry_name(&new_entry).map(str::to_string);
        let by_digest = |desc: &Descriptor| desc.digest() == old_digest;

        let mut entries = index.manifests().clone();
        let position = entries
            .iter()
            .position(|desc| by_digest(desc) && self.entry_name(desc) == new_name.as_deref())
            .or_else(|| entries.iter().position(by_digest))
            .ok_or_else(|| {
                ArtifactError::NotFound(format!("catalog entry with digest {}", old_digest))
            })?;

        entries[position] = new_entry;
        index.set_manifests(entries);
        Ok(())
    }

    /// Replace the entry carrying `new_entry`'s name, or append it.
    pub fn upsert(&self, index: &mut ImageIndex, new_entry: Descriptor) {
        let existing = self
            .entry_name(&new_entry)
            .and_then(|name| self.find_by_name(index, name))
            .map(|(position, _)| position);

        let mut entries = index.manifests().clone();
        match existing {
            Some(position) => entries[position] = new_entry,
            None => entries.push(new_entry),
        }
        index.set_manifests(entries);
    }

    /// Append `new_entry` without looking at names.
    pub fn push(&self, index: &mut ImageIndex, new_entry: Descriptor) {
        let mut entries = index.manifests().clone();
        entries.push(new_entry);
        index.set_manifests(entries);
    }

    /// Remove and return the entry named `name`.
    pub fn remove_by_name(&self, index: &mut ImageIndex, name: &str) -> Result<Descriptor> {
        let (position, _) = self
            .find_by_name(index, name)
            .ok_or_else(|| ArtifactError::NotFound(format!("artifact {}", name)))?;
        let mut entries = index.manifests().clone();
        let removed = entries.remove(position);
        index.set_manifests(entries);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_digest;
    use crate::layout::{OciLayout, INDEX_FILE};
    use crate::manifest::MediaType;
    use a3s_artifact_core::error::ErrorKind;
    use a3s_artifact_core::oci::ANNOTATION_REF_NAME;
    use tempfile::TempDir;

    async fn manager(tmp: &TempDir) -> IndexManager {
        let layout = OciLayout::open(tmp.path()).await.unwrap();
        IndexManager::new(Arc::new(layout), ANNOTATION_REF_NAME)
    }

    fn detached() -> IndexManager {
        IndexManager::new(
            Arc::new(OciLayout::open_unchecked("/unused")),
            ANNOTATION_REF_NAME,
        )
    }

    fn entry(name: &str, content: &[u8]) -> Descriptor {
        Descriptor::new(MediaType::ImageManifest, content.len() as i64, sha256_digest(content))
            .with_annotation(ANNOTATION_REF_NAME, name)
    }

    fn digests(index: &ImageIndex) -> Vec<String> {
        index.manifests().iter().map(|d| d.digest().clone()).collect()
    }

    #[tokio::test]
    async fn test_load_bootstraps_empty_catalog() {
        let tmp = TempDir::new().unwrap();
        let index = manager(&tmp).await.load().await.unwrap();

        assert!(index.manifests().is_empty());
        assert!(tmp.path().join(INDEX_FILE).is_file());
    }

    #[tokio::test]
    async fn test_load_malformed_keeps_file() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp).await;
        std::fs::write(tmp.path().join(INDEX_FILE), "garbage").unwrap();

        let err = manager.load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join(INDEX_FILE)).unwrap(),
            "garbage"
        );
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp).await;
        let mut index = manager.load().await.unwrap();
        manager.push(&mut index, entry("a", b"1"));
        manager.save(&index).await.unwrap();

        assert_eq!(manager.load().await.unwrap(), index);
    }

    #[test]
    fn test_replace_entry_matches_digest_value() {
        let manager = detached();
        let mut index = new_index(vec![entry("a", b"1"), entry("b", b"2")]);

        // A fresh String with the same value must match
        let old = sha256_digest(b"2");
        manager.replace_entry(&mut index, &old, entry("b", b"3")).unwrap();

        assert_eq!(digests(&index), vec![sha256_digest(b"1"), sha256_digest(b"3")]);
    }

    #[test]
    fn test_replace_entry_prefers_same_name() {
        let manager = detached();
        let mut index = new_index(vec![entry("a", b"shared"), entry("b", b"shared")]);

        manager
            .replace_entry(&mut index, &sha256_digest(b"shared"), entry("b", b"new"))
            .unwrap();
        assert_eq!(digests(&index), vec![sha256_digest(b"shared"), sha256_digest(b"new")]);
    }

    #[test]
    fn test_replace_entry_no_match() {
        let manager = detached();
        let mut index = new_index(vec![entry("a", b"1")]);

        let err = manager
            .replace_entry(&mut index, &sha256_digest(b"missing"), entry("a", b"2"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(digests(&index), vec![sha256_digest(b"1")]);
    }

    #[test]
    fn test_upsert_and_remove_by_name() {
        let manager = detached();
        let mut index = new_index(Vec::new());
        manager.upsert(&mut index, entry("a", b"1"));
        manager.upsert(&mut index, entry("b", b"2"));
        manager.upsert(&mut index, entry("a", b"3"));

        assert_eq!(digests(&index), vec![sha256_digest(b"3"), sha256_digest(b"2")]);

        let removed = manager.remove_by_name(&mut index, "a").unwrap();
        assert_eq!(removed.digest(), &sha256_digest(b"3"));
        assert!(manager.find_by_name(&index, "a").is_none());
        assert!(manager.remove_by_name(&mut index, "a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unnamed_entries_are_skipped_by_name_lookup() {
        let manager = detached();
        let index = new_index(vec![
            Descriptor::new(MediaType::ImageManifest, 1, sha256_digest(b"x")),
            entry("named", b"y"),
        ]);

        let (position, _) = manager.find_by_name(&index, "named").unwrap();
        assert_eq!(position, 1);
    }
}
