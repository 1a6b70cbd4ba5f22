//! Character storage
//!
//! One pretty-printed JSON file per character, named `<id>.json`, in a
//! single directory. Writes replace the whole file; concurrent writers to
//! the same id simply race and the last one wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::storage::settings::AppSettings;
use crate::storage::StorageError;
use crate::types::character::Character;

const EXTENSION: &str = "json";

/// Flat-file store of character records
#[derive(Debug, Clone)]
pub struct CharacterStore {
    dir: PathBuf,
}

impl CharacterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(settings.characters_directory.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `id`
    fn path_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, EXTENSION)))
    }

    /// Persist a new character under its own id, replacing any existing file.
    ///
    /// String and numeric ids are accepted; `7` and `"7"` share `7.json`.
    pub async fn create_character(&self, character: &Character) -> Result<(), StorageError> {
        let id = character
            .key()
            .ok_or_else(|| StorageError::InvalidId(character.id.to_string()))?;
        self.write(&id, character).await
    }

    /// Overwrite the record stored under `id`
    pub async fn edit_character(&self, id: &str, character: &Character) -> Result<(), StorageError> {
        if character.key().as_deref() != Some(id) {
            tracing::debug!(
                "Storing character with id {:?} under {:?}",
                character.id,
                id
            );
        }
        self.write(id, character).await
    }

    async fn write(&self, id: &str, character: &Character) -> Result<(), StorageError> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(character)?;
        fs::write(&path, json).await?;

        tracing::debug!("Saved character {} to {}", id, path.display());
        Ok(())
    }

    /// Load a character, `None` if no file exists for `id`
    pub async fn load_character(&self, id: &str) -> Result<Option<Character>, StorageError> {
        let path = self.path_for(id)?;
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Delete a character; deleting a missing one is not an error
    pub async fn remove_character(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Removed character {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Identifiers of every stored character, sorted
    pub async fn list_characters(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Reject ids that would not name a single file inside the store directory
fn validate_id(id: &str) -> Result<(), StorageError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CharacterStore) {
        let dir = TempDir::new().unwrap();
        let store = CharacterStore::new(dir.path().join("characters"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_then_load() {
        let (_dir, store) = store();
        assert!(store.load_character("x").await.unwrap().is_none());

        let character = Character::new("x").with_field("name", "A");
        store.create_character(&character).await.unwrap();

        let loaded = store.load_character("x").await.unwrap();
        assert_eq!(loaded, Some(character));
    }

    #[tokio::test]
    async fn test_numeric_id_round_trip() {
        let (_dir, store) = store();
        let character = Character::new(7).with_field("name", "A");
        store.create_character(&character).await.unwrap();

        assert_eq!(store.list_characters().await.unwrap(), ["7"]);
        let loaded = store.load_character("7").await.unwrap().unwrap();
        assert_eq!(loaded, character);
        assert_eq!(loaded.id, 7);
    }

    #[tokio::test]
    async fn test_hand_written_numeric_file_loads() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("7.json"), r#"{"id": 7, "name": "A"}"#).unwrap();

        let ids = store.list_characters().await.unwrap();
        assert_eq!(ids, ["7"]);
        let loaded = store.load_character(&ids[0]).await.unwrap().unwrap();
        assert_eq!(loaded.key().as_deref(), Some("7"));
        assert_eq!(loaded.name(), Some("A"));
    }

    #[tokio::test]
    async fn test_unkeyable_id_is_rejected() {
        let (_dir, store) = store();
        let character = Character::new(serde_json::json!({"nested": 1}));
        assert!(matches!(
            store.create_character(&character).await,
            Err(StorageError::InvalidId(_))
        ));
        assert!(store.list_characters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_keeps_field_order() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("o.json"), r#"{"id":"o","zeta":1,"alpha":2}"#).unwrap();

        let loaded = store.load_character("o").await.unwrap().unwrap();
        store.edit_character("o", &loaded).await.unwrap();

        let raw = std::fs::read_to_string(store.dir().join("o.json")).unwrap();
        assert_eq!(raw, "{\n  \"id\": \"o\",\n  \"zeta\": 1,\n  \"alpha\": 2\n}");
    }

    #[tokio::test]
    async fn test_file_is_pretty_printed() {
        let (_dir, store) = store();
        store
            .create_character(&Character::new("x").with_field("name", "A"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(store.dir().join("x.json")).unwrap();
        assert_eq!(raw, "{\n  \"id\": \"x\",\n  \"name\": \"A\"\n}");
    }

    #[tokio::test]
    async fn test_edit_overwrites() {
        let (_dir, store) = store();
        store
            .create_character(&Character::new("x").with_field("name", "A"))
            .await
            .unwrap();

        let updated = Character::new("x").with_field("name", "B");
        store.edit_character("x", &updated).await.unwrap();
        assert_eq!(store.load_character("x").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_edit_missing_creates() {
        let (_dir, store) = store();
        let character = Character::new("y").with_field("name", "C");
        store.edit_character("y", &character).await.unwrap();
        assert_eq!(store.load_character("y").await.unwrap(), Some(character));
    }

    #[tokio::test]
    async fn test_remove() {
        let (_dir, store) = store();
        store.remove_character("missing").await.unwrap();

        store.create_character(&Character::new("x")).await.unwrap();
        store.remove_character("x").await.unwrap();
        assert!(store.load_character("x").await.unwrap().is_none());
        store.remove_character("x").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_characters() {
        let (_dir, store) = store();
        assert!(store.list_characters().await.unwrap().is_empty());

        for id in ["beta", "alpha", "gamma"] {
            store.create_character(&Character::new(id)).await.unwrap();
        }
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(store.dir().join("folder.json")).unwrap();

        assert_eq!(
            store.list_characters().await.unwrap(),
            ["alpha", "beta", "gamma"]
        );
    }

    #[tokio::test]
    async fn test_corrupted_record_is_an_error() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("bad.json"), "{").unwrap();

        assert!(matches!(
            store.load_character("bad").await,
            Err(StorageError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_path_escaping_ids_are_rejected() {
        let (_dir, store) = store();
        for id in ["", ".", "..", "../x", "a/b", "a\\b"] {
            assert!(
                matches!(store.load_character(id).await, Err(StorageError::InvalidId(_))),
                "id {:?}",
                id
            );
        }
        assert!(store
            .create_character(&Character::new("../escape"))
            .await
            .is_err());
    }
}
