//! In-memory artifact storage, mainly for tests and ephemeral pipelines.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde_json::Value;

use crate::artifact::Artifact;
use crate::error::ArtifactError;

struct Entry {
    value: Value,
    stored_at: SystemTime,
}

/// A shared, clonable key-value store backing [`MemoryArtifact`]s.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// An artifact handle over one key of this store.
    pub fn artifact(&self, key: impl Into<String>) -> MemoryArtifact {
        MemoryArtifact {
            key: key.into(),
            store: self.clone(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().is_ok_and(|map| map.contains_key(key))
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut map) = self.entries.write() {
            map.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An artifact stored under a key in a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryArtifact {
    key: String,
    store: MemoryStore,
}

impl Artifact for MemoryArtifact {
    fn exists(&self) -> bool {
        self.store.contains(&self.key)
    }

    fn size(&self) -> Result<u64, ArtifactError> {
        let map = self.store.entries.read().expect("store lock poisoned");
        let entry = map
            .get(&self.key)
            .ok_or_else(|| ArtifactError::Missing(self.key.clone()))?;
        let bytes = serde_json::to_vec(&entry.value).map_err(std::io::Error::other)?;
        Ok(bytes.len() as u64)
    }

    fn last_modified(&self) -> Result<SystemTime, ArtifactError> {
        let map = self.store.entries.read().expect("store lock poisoned");
        map.get(&self.key)
            .map(|entry| entry.stored_at)
            .ok_or_else(|| ArtifactError::Missing(self.key.clone()))
    }

    fn load(&self) -> Result<Value, ArtifactError> {
        let map = self.store.entries.read().expect("store lock poisoned");
        map.get(&self.key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| ArtifactError::Missing(self.key.clone()))
    }

    fn dump(&self, value: &Value) -> Result<(), ArtifactError> {
        let mut map = self.store.entries.write().expect("store lock poisoned");
        map.insert(
            self.key.clone(),
            Entry {
                value: value.clone(),
                stored_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.key)
    }
}
