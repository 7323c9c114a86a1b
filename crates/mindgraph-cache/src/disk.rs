use crate::{CacheStats, Counters};
use async_trait::async_trait;
use dashmap::DashMap;
use mindgraph_core::{MindGraphError, ResponseCache, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

/// On-disk response cache shared between workers and processes.
///
/// One JSON file per key, sharded by the first two characters of the file
/// name. Writes go to a temporary file in the shard directory and are renamed
/// into place, so readers never observe a partially written entry; concurrent
/// writers of the same key race and the last rename wins.
#[derive(Clone)]
pub struct DiskCache {
    root: Arc<PathBuf>,
    /// Read-through memory front; entries are immutable per key.
    front: Arc<DashMap<String, Value>>,
    counters: Arc<Counters>,
}

impl DiskCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!("Opened response cache at: {:?}", root);
        Ok(Self {
            root: Arc::new(root),
            front: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.front.len())
    }

    fn file_name(key: &str) -> String {
        let safe = key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            && !key.is_empty()
            && key.len() <= 180;
        if safe {
            key.to_string()
        } else {
            format!("k_{}", crate::content_hash(&[key]))
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = Self::file_name(key);
        let shard: String = name
            .trim_start_matches("k_")
            .chars()
            .rev()
            .take(2)
            .collect();
        self.root.join(shard).join(format!("{}.json", name))
    }

    fn read_entry(path: &Path) -> Result<Option<Value>> {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    // A corrupt entry is treated as a miss and will be rewritten.
                    warn!("Ignoring unreadable cache entry {:?}: {}", path, e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entry(path: &Path, value: &Value) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| MindGraphError::Cache(format!("invalid cache path {:?}", path)))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, value)?;
        tmp.flush()?;
        tmp.persist(path)
            .map_err(|e| MindGraphError::Cache(format!("failed to persist {:?}: {}", path, e)))?;
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.front.get(key) {
            self.counters.hit();
            return Ok(Some(value.value().clone()));
        }

        let path = self.entry_path(key);
        let found = task::spawn_blocking(move || Self::read_entry(&path))
            .await
            .map_err(|e| MindGraphError::Cache(format!("Task failed: {}", e)))??;

        match found {
            Some(value) => {
                self.counters.hit();
                self.front.insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.entry_path(key);
        let stored = value.clone();
        task::spawn_blocking(move || Self::write_entry(&path, &stored))
            .await
            .map_err(|e| MindGraphError::Cache(format!("Task failed: {}", e)))??;

        debug!("Cached entry {}", key);
        self.front.insert(key.to_string(), value);
        self.counters.write();
        Ok(())
    }
}
