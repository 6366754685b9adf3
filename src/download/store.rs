//! JSON manifest persistence for the download manager.
//!
//! The whole task map is serialized to `manifest_path` on every
//! mutation, matching the scheme's "single key in platform key-value
//! storage" persistence model — here realized as a single JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::download::task::{TaskId, TaskRecord};
use crate::error::Result;

/// Reads and writes the download manifest as a JSON object keyed by
/// [`TaskId`].
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Creates a store backed by `path`. The file is not created until
    /// the first [`Self::save`].
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the manifest, returning an empty map if the file does not
    /// yet exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or
    /// deserialized.
    pub fn load(&self) -> Result<BTreeMap<TaskId, TaskRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persists `tasks` to the manifest path, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self, tasks: &BTreeMap<TaskId, TaskRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(tasks)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// The manifest path this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::task::{Metadata, Provider, TaskRecord};

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("manifest.json"));

        let mut tasks = BTreeMap::new();
        tasks.insert(
            "deezer:42".to_owned(),
            TaskRecord::new(
                "deezer:42".to_owned(),
                "https://cdn.example/42".to_owned(),
                "42".to_owned(),
                Provider::Deezer,
                "flac".to_owned(),
                None,
                Metadata::default(),
            ),
        );

        store.save(&tasks).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["deezer:42"].track_id, "42");
    }

    #[test]
    fn missing_manifest_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("does-not-exist.json"));
        assert!(store.load().unwrap().is_empty());
    }
}
