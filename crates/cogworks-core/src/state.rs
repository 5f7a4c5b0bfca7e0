//! Durable key-value state.
//!
//! The whole document is kept in memory and rewritten to disk on every
//! `put`/`remove`: serialized to `<path>.tmp`, then renamed over `<path>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CogError, Result};

#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl StateStore {
    /// Opens the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                CogError::State(format!("Failed to parse state file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "State store opened");
        Ok(Self { path: Some(path), entries: Mutex::new(entries) })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self { path: None, entries: Mutex::new(BTreeMap::new()) }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().await;
        let value = entries.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, "Ignoring unreadable state entry: {e}");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn flush(&self, entries: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            CogError::State(format!("Failed to write state file {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            CogError::State(format!("Failed to finalize state file {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
