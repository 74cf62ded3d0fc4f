//! Key/value settings store
//!
//! Small scalar settings (the SDK install id, flags) live behind the
//! [`KeyValueStore`] trait. [`FileStore`] keeps them in a TOML file in the data
//! directory; [`MemoryStore`] is used when no file can be opened.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Persistent key/value settings
pub trait KeyValueStore: Send {
    fn get_string(&self, key: &str, default: &str) -> String;
    fn set_string(&mut self, key: &str, value: &str);
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn set_int(&mut self, key: &str, value: i64);
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn set_bool(&mut self, key: &str, value: bool);
    fn remove(&mut self, key: &str);

    /// Flush changes to the backing medium.
    fn save(&mut self) -> Result<()>;
}

type Entries = BTreeMap<String, toml::Value>;

fn get_string(entries: &Entries, key: &str, default: &str) -> String {
    entries
        .get(key)
        .and_then(toml::Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn get_int(entries: &Entries, key: &str, default: i64) -> i64 {
    entries
        .get(key)
        .and_then(toml::Value::as_integer)
        .unwrap_or(default)
}

fn get_bool(entries: &Entries, key: &str, default: bool) -> bool {
    entries
        .get(key)
        .and_then(toml::Value::as_bool)
        .unwrap_or(default)
}

/// Settings kept in memory only
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Entries,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        get_string(&self.entries, key, default)
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), toml::Value::String(value.to_string()));
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        get_int(&self.entries, key, default)
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.entries
            .insert(key.to_string(), toml::Value::Integer(value));
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        get_bool(&self.entries, key, default)
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.entries
            .insert(key.to_string(), toml::Value::Boolean(value));
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn save(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Settings stored as a flat TOML table
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Entries,
    dirty: bool,
}

impl FileStore {
    /// Open the store at `path`, creating its directory if needed.
    ///
    /// A missing file yields an empty store; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| {
                Error::Storage(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Entries::new()
        };

        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert(&mut self, key: &str, value: toml::Value) {
        if self.entries.get(key) != Some(&value) {
            self.entries.insert(key.to_string(), value);
            self.dirty = true;
        }
    }
}

impl KeyValueStore for FileStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        get_string(&self.entries, key, default)
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.insert(key, toml::Value::String(value.to_string()));
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        get_int(&self.entries, key, default)
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.insert(key, toml::Value::Integer(value));
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        get_bool(&self.entries, key, default)
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.insert(key, toml::Value::Boolean(value));
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.dirty = true;
        }
    }

    fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let content = toml::to_string(&self.entries)
            .map_err(|e| Error::Storage(format!("failed to serialize settings: {}", e)))?;
        fs::write(&self.path, content)?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_defaults_and_values() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get_string("sdk_id", "none"), "none");
        assert_eq!(store.get_int("count", 7), 7);
        assert!(store.get_bool("flag", true));

        store.set_string("sdk_id", "abc");
        store.set_int("count", 3);
        store.set_bool("flag", false);
        assert_eq!(store.get_string("sdk_id", ""), "abc");
        assert_eq!(store.get_int("count", 0), 3);
        assert!(!store.get_bool("flag", true));

        store.remove("sdk_id");
        assert_eq!(store.get_string("sdk_id", ""), "");
    }

    #[test]
    fn test_type_mismatch_falls_back_to_default() {
        let mut store = MemoryStore::new();
        store.set_string("count", "three");
        assert_eq!(store.get_int("count", 9), 9);
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut store = FileStore::open(&path).unwrap();
        store.set_string("sdk_id", "abc-123");
        store.set_bool("analytics", true);
        store.save().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_string("sdk_id", ""), "abc-123");
        assert!(reopened.get_bool("analytics", false));
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        assert!(matches!(FileStore::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn test_save_without_changes_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let mut store = FileStore::open(&path).unwrap();
        store.save().unwrap();
        assert!(!path.exists());
    }
}
