//! [`KeyValueStore`] backed by one JSON file.
//!
//! The whole map is rewritten on every change: written to a sibling temp
//! file, then renamed over the original, so a crash leaves either the old or
//! the new map on disk.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use shared::capabilities::{KeyValueStore, KvError, KvKey};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FileKvStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, KvError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error("read", &self.path, &e)),
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "store file is corrupt, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn save(&self, map: &BTreeMap<String, String>) -> Result<(), KvError> {
        let encoded = serde_json::to_vec_pretty(map).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: None,
        })?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error("create", dir, &e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded)
            .await
            .map_err(|e| io_error("write", &tmp, &e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, &e))?;
        debug!(path = %self.path.display(), entries = map.len(), "store saved");
        Ok(())
    }
}

fn io_error(action: &str, path: &Path, error: &std::io::Error) -> KvError {
    KvError::Storage {
        message: format!("could not {action} {}: {error}", path.display()),
        retryable: matches!(
            error.kind(),
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
        ),
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key.as_str()))
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.as_str().to_string(), value);
        self.save(&map).await
    }

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        let existed = map.remove(key.as_str()).is_some();
        if existed {
            self.save(&map).await?;
        }
        Ok(existed)
    }

    async fn get_multi(&self, keys: &[KvKey]) -> Result<Vec<Option<String>>, KvError> {
        let _guard = self.lock.lock().await;
        let map = self.load().await?;
        Ok(keys.iter().map(|k| map.get(k.as_str()).cloned()).collect())
    }
}
