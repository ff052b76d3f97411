//! Small key-value persistence for UI-facing state such as the last submitted config.
//!
//! Two implementations:
//! - [`MemoryStore`]: process-local, used in tests and ephemeral sessions
//! - [`JsonFileStore`]: a single JSON object file, rewritten on every change

use crate::error::{TrainingError, TrainingResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> TrainingResult<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> TrainingResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> TrainingResult<()>;

    fn clear(&self) -> TrainingResult<()>;
}

fn poisoned() -> TrainingError {
    TrainingError::Store("store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TrainingResult<Option<Value>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> TrainingResult<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> TrainingResult<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.remove(key);
        Ok(())
    }

    fn clear(&self) -> TrainingResult<()> {
        self.values.lock().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Store backed by a JSON object on disk. The file is created on first write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// `~/.tessera/state.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".tessera").join("state.json")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> TrainingResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(TrainingError::Store(format!("{} does not contain a JSON object", self.path.display()))),
        }
    }

    fn write(&self, values: &Map<String, Value>) -> TrainingResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), keys = values.len(), "Store written");
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> TrainingResult<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut values = self.read()?;
        f(&mut values);
        self.write(&values)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> TrainingResult<Option<Value>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> TrainingResult<()> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> TrainingResult<()> {
        self.update(|values| {
            values.remove(key);
        })
    }

    fn clear(&self) -> TrainingResult<()> {
        self.update(Map::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("preset", json!("Low VRAM (12GB)")).unwrap();
        store.set("count", json!(3)).unwrap();
        assert_eq!(store.get("preset").unwrap(), Some(json!("Low VRAM (12GB)")));

        store.set("preset", json!("High VRAM (24GB)")).unwrap();
        assert_eq!(store.get("preset").unwrap(), Some(json!("High VRAM (24GB)")));

        store.delete("preset").unwrap();
        store.delete("preset").unwrap();
        assert_eq!(store.get("preset").unwrap(), None);

        store.clear().unwrap();
        assert_eq!(store.get("count").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_json_file_store() {
        let temp = TempDir::new().unwrap();
        exercise(&JsonFileStore::new(temp.path().join("state").join("state.json")));
    }

    #[test]
    fn test_json_file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        JsonFileStore::new(&path).set("last", json!({"a": 1})).unwrap();
        assert_eq!(JsonFileStore::new(&path).get("last").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn test_json_file_store_rejects_non_object() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(JsonFileStore::new(&path).get("x"), Err(TrainingError::Store(_))));
    }
}
