//! Character reference galleries and per-panel reference selection.
//!
//! Names are matched case-insensitively by comparison only. Stored display
//! names keep their original spelling so exported metadata round-trips.

use anyhow::{Context, Result};
use log::info;

use crate::core::config::CharacterConfig;
use crate::core::io::Storage;
use crate::core::state::{CharacterReference, ReferenceProvenance};
use crate::utils::image::{mime_from_extension, sniff_mime, DEFAULT_IMAGE_MIME};

#[derive(Debug, Clone)]
struct Gallery {
    name: String,
    references: Vec<CharacterReference>,
}

/// Named sets of reference images, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CharacterStore {
    galleries: Vec<Gallery>,
}

impl CharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every configured reference image through `storage`.
    pub async fn load(characters: &[CharacterConfig], storage: &dyn Storage) -> Result<Self> {
        let mut store = Self::new();
        for character in characters {
            let name = character.name.trim();
            if name.is_empty() {
                continue;
            }
            for path in &character.images {
                let bytes = storage
                    .read(path)
                    .await
                    .with_context(|| format!("Failed to load reference image for {}", name))?;
                let mime = sniff_mime(&bytes)
                    .or_else(|| mime_from_extension(path))
                    .unwrap_or(DEFAULT_IMAGE_MIME);
                store.add(name, bytes, mime);
            }
        }
        if !store.is_empty() {
            info!(
                "Loaded {} reference image(s) for {} character(s)",
                store.len(),
                store.galleries.len()
            );
        }
        Ok(store)
    }

    /// Appends a reference to the gallery for `name`, creating it if needed.
    /// An existing gallery whose name matches case-insensitively is reused.
    pub fn add(&mut self, name: &str, image_bytes: Vec<u8>, mime_type: &str) {
        let idx = match self.position(name) {
            Some(idx) => idx,
            None => {
                self.galleries.push(Gallery {
                    name: name.to_string(),
                    references: Vec::new(),
                });
                self.galleries.len() - 1
            }
        };
        let gallery = &mut self.galleries[idx];
        gallery.references.push(CharacterReference {
            name: gallery.name.clone(),
            image_bytes,
            mime_type: mime_type.to_string(),
        });
    }

    /// Drops the whole gallery for `name`. Returns whether one existed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.galleries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.galleries.iter().map(|g| g.name.clone()).collect()
    }

    pub fn references(&self, name: &str) -> &[CharacterReference] {
        self.position(name)
            .map(|idx| self.galleries[idx].references.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterReference> {
        self.galleries.iter().flat_map(|g| g.references.iter())
    }

    /// Total number of reference images.
    pub fn len(&self) -> usize {
        self.galleries.iter().map(|g| g.references.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.galleries
            .iter()
            .position(|g| names_match(&g.name, name))
    }
}

/// Selects the reference images to attach to a panel.
///
/// With no mentioned characters every stored reference is attached. Otherwise
/// only galleries whose name matches a mentioned name (case-insensitive) are
/// used; mentioned names with no gallery are ignored.
pub fn resolve_references(mentioned: &[String], store: &CharacterStore) -> Vec<CharacterReference> {
    if mentioned.is_empty() {
        return store.iter().cloned().collect();
    }
    store
        .galleries
        .iter()
        .filter(|g| mentioned.iter().any(|m| names_match(m, &g.name)))
        .flat_map(|g| g.references.iter().cloned())
        .collect()
}

/// Case-insensitive name comparison (Unicode lowercase), ignoring
/// surrounding whitespace.
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn provenance(references: &[CharacterReference]) -> Vec<ReferenceProvenance> {
    references.iter().map(ReferenceProvenance::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn store() -> CharacterStore {
        let mut store = CharacterStore::new();
        store.add("Mira", vec![1], "image/png");
        store.add("Otto", vec![2], "image/jpeg");
        store.add("mira", vec![3], "image/webp");
        store
    }

    #[test]
    fn test_add_groups_case_insensitively_and_keeps_display_name() {
        let store = store();
        assert_eq!(store.names(), vec!["Mira", "Otto"]);
        assert_eq!(store.len(), 3);
        let mira = store.references("MIRA");
        assert_eq!(mira.len(), 2);
        assert!(mira.iter().all(|r| r.name == "Mira"));
    }

    #[test]
    fn test_names_match() {
        assert!(names_match("Mira", " mIRA "));
        assert!(names_match("Émile", "émile"));
        assert!(!names_match("Mira", "Mirabel"));
    }

    #[test]
    fn test_remove_whole_gallery() {
        let mut store = store();
        assert!(store.remove("mira"));
        assert!(!store.remove("mira"));
        assert_eq!(store.names(), vec!["Otto"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_mentions_attach_everything() {
        let refs = resolve_references(&[], &store());
        let bytes: Vec<u8> = refs.iter().map(|r| r.image_bytes[0]).collect();
        assert_eq!(bytes, vec![1, 3, 2]);
    }

    #[test]
    fn test_single_mention_is_case_insensitive() {
        let refs = resolve_references(&["OTTO".to_string()], &store());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "Otto");
        assert_eq!(refs[0].mime_type, "image/jpeg");
    }

    #[test]
    fn test_unknown_mentions_are_ignored() {
        let refs = resolve_references(&["Nobody".to_string(), "mira".to_string()], &store());
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.name == "Mira"));

        let none = resolve_references(&["Nobody".to_string()], &store());
        assert!(none.is_empty());
    }

    #[test]
    fn test_empty_store() {
        let store = CharacterStore::new();
        assert!(store.is_empty());
        assert!(resolve_references(&[], &store).is_empty());
        assert!(store.references("Mira").is_empty());
    }

    #[test]
    fn test_provenance() {
        let refs = resolve_references(&["otto".to_string()], &store());
        let prov = provenance(&refs);
        assert_eq!(
            prov,
            vec![ReferenceProvenance {
                name: "Otto".to_string(),
                mime_type: "image/jpeg".to_string(),
            }]
        );
        let json = serde_json::to_value(&prov).unwrap();
        assert_eq!(json[0]["mimeType"], "image/jpeg");
    }

    #[tokio::test]
    async fn test_load_from_config_sniffs_mime() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let png = dir.path().join("mira.bin");
        let jpg = dir.path().join("otto.jpg");
        std::fs::write(&png, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0])?;
        std::fs::write(&jpg, b"not really a jpeg")?;

        let characters = vec![
            CharacterConfig {
                name: "Mira".to_string(),
                images: vec![png.to_string_lossy().to_string()],
            },
            CharacterConfig {
                name: "Otto".to_string(),
                images: vec![jpg.to_string_lossy().to_string()],
            },
            CharacterConfig {
                name: "  ".to_string(),
                images: vec!["ignored.png".to_string()],
            },
        ];

        let store = CharacterStore::load(&characters, &NativeStorage::new()).await?;
        assert_eq!(store.names(), vec!["Mira", "Otto"]);
        assert_eq!(store.references("Mira")[0].mime_type, "image/png");
        assert_eq!(store.references("Otto")[0].mime_type, "image/jpeg");
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let characters = vec![CharacterConfig {
            name: "Mira".to_string(),
            images: vec!["/definitely/not/here.png".to_string()],
        }];
        assert!(CharacterStore::load(&characters, &NativeStorage::new()).await.is_err());
    }
}
