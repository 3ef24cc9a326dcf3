//! Persisted search preferences.
//!
//! Only the active filters, sort and page size of each entity family are
//! persisted. Cached records and transient flags never are.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use coachdesk_core::{DeskError, SortSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reading or writing the preference file.
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<PreferenceError> for DeskError {
    fn from(error: PreferenceError) -> Self {
        DeskError::unknown(error.to_string())
    }
}

/// The persisted part of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSearch<F, S> {
    pub filters: F,
    pub sort: SortSpec<S>,
    pub per_page: u32,
}

/// Key-value storage for preferences, one JSON value per key.
pub trait PreferenceStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, PreferenceError>;

    fn save(&self, key: &str, value: Value) -> Result<(), PreferenceError>;

    fn remove(&self, key: &str) -> Result<(), PreferenceError>;
}

/// Preferences kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn load(&self, key: &str) -> Result<Option<Value>, PreferenceError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// Preferences stored as one JSON object in a file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, PreferenceError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Map::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, values: &Map<String, Value>) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn load(&self, key: &str) -> Result<Option<Value>, PreferenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value);
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachdesk_core::{CenterCategory, CenterFilters, CenterSortField};
    use serde_json::json;

    #[test]
    fn test_in_memory_round_trip() {
        let prefs = InMemoryPreferences::new();
        assert!(prefs.load("centers").unwrap().is_none());
        prefs.save("centers", json!({"per_page": 10})).unwrap();
        assert_eq!(prefs.load("centers").unwrap(), Some(json!({"per_page": 10})));
        prefs.remove("centers").unwrap();
        assert!(prefs.load("centers").unwrap().is_none());
    }

    #[test]
    fn test_file_preferences_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let saved = SavedSearch {
            filters: CenterFilters {
                category: Some(CenterCategory::SchoolCoaching),
                ..Default::default()
            },
            sort: SortSpec::asc(CenterSortField::Name),
            per_page: 20,
        };
        JsonFilePreferences::new(&path)
            .save("coaching_centers", serde_json::to_value(&saved).unwrap())
            .unwrap();

        let reopened = JsonFilePreferences::new(&path);
        let value = reopened.load("coaching_centers").unwrap().unwrap();
        let restored: SavedSearch<CenterFilters, CenterSortField> =
            serde_json::from_value(value).unwrap();
        assert_eq!(restored, saved);
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = JsonFilePreferences::new(dir.path().join("absent.json"));
        assert!(prefs.load("anything").unwrap().is_none());
        prefs.remove("anything").unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, b"{not json").unwrap();
        let err = JsonFilePreferences::new(&path).load("k").unwrap_err();
        assert!(matches!(err, PreferenceError::Format(_)));
    }
}
