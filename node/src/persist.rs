//! Saving the local store between runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_engine::StoreSnapshot;

use crate::error::Result;

/// Everything a node needs to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub snapshot: StoreSnapshot,
    /// Inbound sync position per room
    #[serde(default)]
    pub sync_tokens: BTreeMap<String, u64>,
}

/// A JSON state file replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. `None` when no state was saved yet.
    pub async fn load(&self) -> Result<Option<NodeState>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write to a sibling temp file, then rename over the old state.
    pub async fn save(&self, state: &NodeState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(
            path = %self.path.display(),
            entities = state.snapshot.entity_count(),
            "state saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_engine::{Database, Schema, Store};

    #[tokio::test]
    async fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_restores_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));

        let mut store = Store::new(Schema::new(1), "node-1");
        let mut db = Database::new("db-1", "notes", 1000);
        store.save(&mut db, 1000).unwrap();

        let mut tokens = BTreeMap::new();
        tokens.insert("!room:memory".to_string(), 7);
        let state = NodeState {
            snapshot: store.export_state(),
            sync_tokens: tokens,
        };
        file.save(&state).await.unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());

        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);

        let mut restored = Store::new(Schema::new(1), "node-1");
        restored.import_state(loaded.snapshot).unwrap();
        assert_eq!(restored.get::<Database>("db-1").unwrap().meta.version, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{ nope").await.unwrap();
        assert!(StateFile::new(path).load().await.is_err());
    }
}
