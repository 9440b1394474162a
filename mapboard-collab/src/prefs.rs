//! Persisted local preferences (last username and colour).
//!
//! Read once when a session starts and rewritten whenever the local
//! presence entry changes. Not part of the replicated state.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const USERNAME_KEY: &str = "username";
pub const USER_COLOR_KEY: &str = "userColor";

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("prefs i/o: {0}")]
    Io(#[from] io::Error),
    #[error("prefs file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key-value store.
pub trait PrefsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError>;
}

#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: RefCell<BTreeMap<String, String>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrefsStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Prefs kept in a flat JSON object on disk. The file is rewritten on
/// every `set`; a missing file reads as empty.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: RefCell<BTreeMap<String, String>>,
}

impl FilePrefs {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: RefCell::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrefsStore for FilePrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let text = {
            let mut values = self.values.borrow_mut();
            if values.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            values.insert(key.to_string(), value.to_string());
            serde_json::to_string_pretty(&*values)?
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_prefs() {
        let prefs = MemoryPrefs::new();
        assert_eq!(prefs.get(USERNAME_KEY), None);
        prefs.set(USERNAME_KEY, "abc").unwrap();
        assert_eq!(prefs.get(USERNAME_KEY).as_deref(), Some("abc"));
    }

    #[test]
    fn test_file_prefs_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let prefs = FilePrefs::open(&path).unwrap();
        assert_eq!(prefs.get(USER_COLOR_KEY), None);
        prefs.set(USER_COLOR_KEY, "Teal").unwrap();
        prefs.set(USERNAME_KEY, "swift-teal-otter").unwrap();

        let reopened = FilePrefs::open(&path).unwrap();
        assert_eq!(reopened.get(USER_COLOR_KEY).as_deref(), Some("Teal"));
        assert_eq!(reopened.get(USERNAME_KEY).as_deref(), Some("swift-teal-otter"));
    }

    #[test]
    fn test_file_prefs_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FilePrefs::open(&path), Err(PrefsError::Json(_))));
    }
}
