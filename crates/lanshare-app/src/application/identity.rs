//! Persisted device identity.
//!
//! Two values identify this installation to its peers: a UUID and a display
//! name.  Both are read through an injected [`KeyValueStore`].  On the first
//! read of an unset key a default is generated by a caller-supplied provider
//! and written back, so generation happens at most once per installation.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Store key of the device UUID.
pub const KEY_DEVICE_UUID: &str = "DeviceUuid";
/// Store key of the device display name.
pub const KEY_DEVICE_NAME: &str = "DeviceName";

const FALLBACK_DEVICE_NAME: &str = "lanshare-device";

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// String key/value persistence for settings.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send {
    /// Returns the stored value, or `None` if unset.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the value could not be persisted.
    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// Lazily defaulted identity values backed by a [`KeyValueStore`].
pub struct IdentitySettings {
    store: Box<dyn KeyValueStore>,
    /// Values already resolved this session.
    cache: HashMap<String, String>,
}

impl IdentitySettings {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Reads `key`, generating and persisting a value with `default` if the
    /// store has none.
    ///
    /// `default` runs at most once per key for the lifetime of this value.  If
    /// persisting the generated value fails, it is still used for the rest of
    /// the session and the failure is logged.
    pub fn get_or_init<F>(&mut self, key: &str, default: F) -> String
    where
        F: FnOnce() -> String,
    {
        if let Some(value) = self.cache.get(key) {
            return value.clone();
        }

        let value = match self.store.get(key) {
            Some(stored) if !stored.is_empty() => stored,
            _ => {
                let generated = default();
                info!("generated default value for setting {key}");
                if let Err(e) = self.store.set(key, &generated) {
                    warn!("failed to persist setting {key}: {e}; keeping it for this session only");
                }
                generated
            }
        };
        self.cache.insert(key.to_string(), value.clone());
        value
    }

    /// Stores `value` under `key` and updates the session cache.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the store rejects the write; the cache
    /// is left unchanged in that case.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.store.set(key, value)?;
        self.cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn device_uuid(&mut self) -> String {
        self.get_or_init(KEY_DEVICE_UUID, default_device_uuid)
    }

    pub fn device_name(&mut self) -> String {
        self.get_or_init(KEY_DEVICE_NAME, default_device_name)
    }
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("cached", &self.cache.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A fresh random UUID in hyphenated form.
pub fn default_device_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// The local host name, or a fixed fallback if it cannot be read.
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::cell::Cell;

    #[test]
    fn test_stored_value_is_returned_without_generating() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .with(eq(KEY_DEVICE_UUID))
            .times(1)
            .returning(|_| Some("stored-uuid".to_string()));
        store.expect_set().never();
        let mut settings = IdentitySettings::new(Box::new(store));

        // Act
        let value = settings.get_or_init(KEY_DEVICE_UUID, || panic!("must not generate"));

        // Assert
        assert_eq!(value, "stored-uuid");
    }

    #[test]
    fn test_missing_value_is_generated_once_and_persisted() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store.expect_get().times(1).returning(|_| None);
        store
            .expect_set()
            .with(eq(KEY_DEVICE_NAME), eq("generated"))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut settings = IdentitySettings::new(Box::new(store));
        let calls = Cell::new(0);

        // Act
        let first = settings.get_or_init(KEY_DEVICE_NAME, || {
            calls.set(calls.get() + 1);
            "generated".to_string()
        });
        let second = settings.get_or_init(KEY_DEVICE_NAME, || {
            calls.set(calls.get() + 1);
            "other".to_string()
        });

        // Assert
        assert_eq!(first, "generated");
        assert_eq!(second, "generated");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_empty_stored_value_counts_as_unset() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| Some(String::new()));
        store.expect_set().times(1).returning(|_, _| Ok(()));
        let mut settings = IdentitySettings::new(Box::new(store));

        assert_eq!(settings.get_or_init("Key", || "fresh".to_string()), "fresh");
    }

    #[test]
    fn test_persist_failure_keeps_value_for_session() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store.expect_get().times(1).returning(|_| None);
        store.expect_set().times(1).returning(|_, _| {
            Err(SettingsError::Io {
                path: "/readonly/settings.toml".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        });
        let mut settings = IdentitySettings::new(Box::new(store));

        // Act
        let first = settings.device_uuid();
        let second = settings.device_uuid();

        // Assert
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_set_updates_cache() {
        let mut store = MockKeyValueStore::new();
        store.expect_set().times(1).returning(|_, _| Ok(()));
        store.expect_get().never();
        let mut settings = IdentitySettings::new(Box::new(store));

        settings.set(KEY_DEVICE_NAME, "renamed").unwrap();

        assert_eq!(settings.device_name(), "renamed");
    }

    #[test]
    fn test_default_device_name_is_not_empty() {
        assert!(!default_device_name().is_empty());
    }
}
