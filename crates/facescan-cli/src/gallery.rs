//! JSON-backed gallery file.

use anyhow::{Context, Result};
use chrono::Utc;
use facescan_core::{Embedding, FaceRecord, GalleryStore};
use std::path::{Path, PathBuf};

pub fn default_gallery_path() -> PathBuf {
    facescan_core::default_data_dir().join("gallery.json")
}

/// Load the store at `path`; a missing file is an empty store.
pub fn load(path: &Path) -> Result<GalleryStore> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no gallery file yet");
        return Ok(GalleryStore::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gallery {}", path.display()))?;
    let store: GalleryStore = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse gallery {}", path.display()))?;
    Ok(store)
}

/// Write the store to `path` via a temporary file and rename.
pub fn save(path: &Path, store: &GalleryStore) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn new_record(person: &str, embedding: Embedding) -> FaceRecord {
    FaceRecord {
        id: uuid::Uuid::new_v4().to_string(),
        person: person.to_string(),
        embedding,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let store = load(Path::new("/nonexistent/facescan/gallery.json")).unwrap();
        assert!(store.galleries.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("facescan-gallery-{}", std::process::id()));
        let path = dir.join("nested").join("gallery.json");

        let mut store = GalleryStore::default();
        let embedding = Embedding { values: vec![0.6, 0.8], model_version: Some("w600k_mbf".into()) };
        store.gallery_mut("default").enroll(new_record("alice", embedding));
        save(&path, &store).unwrap();

        let reloaded = load(&path).unwrap();
        let gallery = reloaded.gallery("default").unwrap();
        assert_eq!(gallery.persons(), vec!["alice"]);
        assert_eq!(gallery.records[0].embedding.values, vec![0.6, 0.8]);
        assert_eq!(gallery.records[0].id.len(), 36);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
