//! Per-document view state that survives a reload (the active zoom scale).

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub type DocumentKey = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0b6d4e-8a51-5c27-9e1d-2b7c4a90f6e3").expect("valid namespace UUID")
});

/// Stable key for a document served by `base_url`.
pub fn document_key(base_url: &str, document_id: u64) -> DocumentKey {
    let name = format!("{}#{}", base_url.trim_end_matches('/'), document_id);
    Uuid::new_v5(&DOCUMENT_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub scale: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

pub trait ViewStateStore: Send + Sync {
    fn load(&self, key: DocumentKey) -> Result<Option<ViewState>>;
    fn save(&self, key: DocumentKey, state: &ViewState) -> Result<()>;
}

pub struct FileViewStateStore {
    root: PathBuf,
}

impl FileViewStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create view state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, key: DocumentKey) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

impl ViewStateStore for FileViewStateStore {
    /// A missing file means the document was never opened here.
    fn load(&self, key: DocumentKey) -> Result<Option<ViewState>> {
        let path = self.state_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read view state {}", path.display()))
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("view state {} is not valid json", path.display()))
    }

    /// Replaced atomically through a temp file in the same directory.
    fn save(&self, key: DocumentKey, state: &ViewState) -> Result<()> {
        let path = self.state_path(key);
        let mut tmp = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to stage view state in {}", self.root.display()))?;
        serde_json::to_writer(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(&path)
            .with_context(|| format!("failed to replace view state {}", path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryViewStateStore {
    inner: Mutex<HashMap<DocumentKey, ViewState>>,
}

impl MemoryViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStateStore for MemoryViewStateStore {
    fn load(&self, key: DocumentKey) -> Result<Option<ViewState>> {
        Ok(self.inner.lock().get(&key).cloned())
    }

    fn save(&self, key: DocumentKey, state: &ViewState) -> Result<()> {
        self.inner.lock().insert(key, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn document_key_is_stable_and_distinct() {
        let a = document_key("http://localhost:8000/", 3);
        assert_eq!(a, document_key("http://localhost:8000", 3));
        assert_ne!(a, document_key("http://localhost:8000", 4));
        assert_ne!(a, document_key("http://example.org", 3));
    }

    #[test]
    fn file_store_round_trips_scale() {
        let dir = tempdir().unwrap();
        let store = FileViewStateStore::new(dir.path().join("views")).unwrap();
        let key = document_key("http://localhost:8000", 1);

        assert!(store.load(key).unwrap().is_none());
        store.save(key, &ViewState { scale: 1.75 }).unwrap();
        assert_eq!(store.load(key).unwrap(), Some(ViewState { scale: 1.75 }));
        store.save(key, &ViewState { scale: 0.5 }).unwrap();
        assert_eq!(store.load(key).unwrap(), Some(ViewState { scale: 0.5 }));
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileViewStateStore::new(dir.path().to_path_buf()).unwrap();
        let key = document_key("http://localhost:8000", 2);
        fs::write(store.state_path(key), "{not json").unwrap();
        assert!(store.load(key).is_err());
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryViewStateStore::new();
        let key = document_key("http://localhost:8000", 1);
        store.save(key, &ViewState { scale: 2.0 }).unwrap();
        store.save(key, &ViewState { scale: 0.5 }).unwrap();
        assert_eq!(store.load(key).unwrap().unwrap().scale, 0.5);
    }
}
