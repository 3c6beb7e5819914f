// src/ingest/summary.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::ingest::runner::SourceOutcome;
use crate::sync::SyncReport;

pub const LATEST_RUN_KEY: &str = "LATEST_RUN";
pub const LATEST_ERROR_KEY: &str = "LATEST_ERROR";
pub const EVENTS_KEY: &str = "EVENTS";

/// Everything a run reports about itself. Overwritten every run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw records extracted across sources, before normalization.
    pub total_found: usize,
    /// Events left after dedup, time filter and the global cap.
    pub total_after_filtering: usize,
    /// Empty titles plus list items that were not records.
    pub rejected: usize,
    pub duplicates: usize,
    pub past: usize,
    pub sources: Vec<SourceOutcome>,
    pub sync: SyncReport,
    pub config: Value,
}

/// Written instead of a summary when the run dies.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub at: DateTime<Utc>,
    pub message: String,
    pub total_found: usize,
    pub accumulated: usize,
    pub sources_done: usize,
}

/// Key-value store that outlives a run. Later writes replace earlier ones.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<()>;
}

/// One `<key>.json` file per key, written via a temp file + rename.
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$HARVEST_STATE_DIR`, else `state/`.
    pub fn from_env() -> Self {
        let dir = std::env::var("HARVEST_STATE_DIR").unwrap_or_else(|_| "state".to_string());
        Self::new(dir)
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl RunStore for FileRunStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

// --- Test helper ---
pub struct MemoryRunStore {
    pub entries: std::sync::Mutex<std::collections::BTreeMap<String, Value>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Default::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryRunStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_overwrites_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        store.put(LATEST_RUN_KEY, json!({"n": 1})).await.unwrap();
        store.put(LATEST_RUN_KEY, json!({"n": 2})).await.unwrap();

        let s = std::fs::read_to_string(store.path_for(LATEST_RUN_KEY)).unwrap();
        let v: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v, json!({"n": 2}));
        assert!(!store.path_for(LATEST_RUN_KEY).with_extension("json.tmp").exists());
    }
}
