//! [`KeyValueStore`] implementations.
//!
//! [`TomlSettingsStore`] keeps a flat table of strings in `settings.toml`
//! next to the config file:
//!
//! ```toml
//! DeviceName = "office-pc"
//! DeviceUuid = "0f8e5b1c-2d7a-4a43-9f5e-0c5d0c1f7f2a"
//! ```
//!
//! The file is read once when the store is opened and rewritten in full on
//! every `set`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::application::identity::{KeyValueStore, SettingsError};

/// File-backed settings store.
#[derive(Debug)]
pub struct TomlSettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl TomlSettingsStore {
    /// Opens the store at `path`.  A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the file exists but cannot be read and
    /// [`SettingsError::Parse`] if it is not a flat string table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        debug!("opened settings store {} ({} keys)", path.display(), values.len());
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string(&self.values)?;
        std::fs::write(&self.path, content).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for TomlSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let previous = self.values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.save() {
            match previous {
                Some(old) => self.values.insert(key.to_string(), old),
                None => self.values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Volatile store for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `pairs`.
    pub fn with_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::identity::{IdentitySettings, KEY_DEVICE_UUID};

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();

        let store = TomlSettingsStore::open(dir.path().join("settings.toml")).unwrap();

        assert_eq!(store.get(KEY_DEVICE_UUID), None);
    }

    #[test]
    fn test_set_persists_across_reopen() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("settings.toml");
        let mut store = TomlSettingsStore::open(&path).unwrap();

        // Act
        store.set("DeviceName", "office-pc").unwrap();
        let reopened = TomlSettingsStore::open(&path).unwrap();

        // Assert
        assert_eq!(reopened.get("DeviceName").as_deref(), Some("office-pc"));
    }

    #[test]
    fn test_identity_generated_once_per_installation() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        // Act: two "process lifetimes" over the same file.
        let first = {
            let store = TomlSettingsStore::open(&path).unwrap();
            IdentitySettings::new(Box::new(store)).device_uuid()
        };
        let second = {
            let store = TomlSettingsStore::open(&path).unwrap();
            IdentitySettings::new(Box::new(store)).device_uuid()
        };

        // Assert
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "DeviceUuid = [1, 2]").unwrap();

        let result = TomlSettingsStore::open(&path);

        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::with_values([("DeviceName", "a")]);

        store.set("DeviceName", "b").unwrap();

        assert_eq!(store.get("DeviceName").as_deref(), Some("b"));
        assert_eq!(store.get("Other"), None);
    }
}
