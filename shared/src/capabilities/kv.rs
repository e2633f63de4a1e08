use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey(String);

impl KvKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        match Self::problem(&key) {
            None => Ok(Self(key)),
            Some(reason) => Err(KvError::InvalidKey {
                key: key.escape_default().take(50).collect(),
                reason: reason.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn problem(key: &str) -> Option<&'static str> {
        if key.trim().is_empty() {
            Some("empty")
        } else if key.len() > MAX_KEY_LENGTH {
            Some("too long")
        } else if key.contains("..") || key.starts_with(['/', '\\']) {
            Some("looks like a path")
        } else if key.chars().any(char::is_control) {
            Some("control characters")
        } else {
            None
        }
    }
}

impl std::fmt::Display for KvKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three records the app keeps between launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    Location,
    PlaceInfo,
    Quiz,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [StoreKey::Location, StoreKey::PlaceInfo, StoreKey::Quiz];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Location => "s_location",
            StoreKey::PlaceInfo => "s_info",
            StoreKey::Quiz => "s_quiz",
        }
    }

    pub fn key(&self) -> KvKey {
        KvKey(self.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvOperation {
    Get { key: KvKey },
    Set { key: KvKey, value: String },
    Delete { key: KvKey },
    GetMulti { keys: Vec<KvKey> },
}

impl KvOperation {
    pub fn set_json<T: Serialize>(key: KvKey, value: &T) -> Result<Self, KvError> {
        let value = serde_json::to_string(value).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: Some(key.to_string()),
        })?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(KvError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(Self::Set { key, value })
    }

    pub fn get_multi(keys: Vec<KvKey>) -> Result<Self, KvError> {
        if keys.len() > MAX_BATCH_SIZE {
            return Err(KvError::BatchTooLarge {
                count: keys.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(Self::GetMulti { keys })
    }
}

impl Operation for KvOperation {
    type Output = KvResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvOutput {
    Value(Option<String>),
    Written,
    Deleted { existed: bool },
    Multi(Vec<Option<String>>),
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (retryable: {retryable})")]
    Storage { message: String, retryable: bool },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },

    #[error("too many keys in batch: {count} exceeds maximum of {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("unexpected storage output for {operation}")]
    UnexpectedOutput { operation: String },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Storage { retryable: true, .. })
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type KvResult = Result<KvOutput, KvError>;

/// Decodes a stored JSON value. Absent and undecodable values both come back
/// as `None`; the caller logs and moves on.
pub fn decode_stored<T: DeserializeOwned>(key: StoreKey, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = key.as_str(), error = %e, "ignoring undecodable stored value");
            None
        }
    }
}

/// String-keyed storage with overwrite semantics.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError>;

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError>;

    async fn get_multi(&self, keys: &[KvKey]) -> Result<Vec<Option<String>>, KvError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn execute(&self, operation: KvOperation) -> KvResult {
        match operation {
            KvOperation::Get { key } => self.get(&key).await.map(KvOutput::Value),
            KvOperation::Set { key, value } => {
                self.set(&key, value).await.map(|()| KvOutput::Written)
            }
            KvOperation::Delete { key } => self
                .delete(&key)
                .await
                .map(|existed| KvOutput::Deleted { existed }),
            KvOperation::GetMulti { keys } => self.get_multi(&keys).await.map(KvOutput::Multi),
        }
    }
}

/// In-process store. Used by tests and by the shell's `--ephemeral` mode.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(self.entries.read().await.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        self.entries
            .write()
            .await
            .insert(key.as_str().to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        Ok(self.entries.write().await.remove(key.as_str()).is_some())
    }
}

#[derive(Clone)]
pub struct KeyValue<Ev> {
    context: CapabilityContext<KvOperation, Ev>,
}

impl<Ev> Capability<Ev> for KeyValue<Ev> {
    type Operation = KvOperation;
    type MappedSelf<MappedEv> = KeyValue<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        KeyValue::new(self.context.map_event(f))
    }
}

impl<Ev> KeyValue<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<KvOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn execute<F>(&self, operation: KvOperation, callback: F)
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(callback(result));
        });
    }

    pub fn get_multi<F>(&self, keys: Vec<KvKey>, callback: F) -> Result<(), KvError>
    where
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        self.execute(KvOperation::get_multi(keys)?, callback);
        Ok(())
    }

    pub fn set_json<T, F>(&self, key: StoreKey, value: &T, callback: F) -> Result<(), KvError>
    where
        T: Serialize,
        F: FnOnce(KvResult) -> Ev + Send + 'static,
    {
        self.execute(KvOperation::set_json(key.key(), value)?, callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(KvKey::new("").is_err());
        assert!(KvKey::new("   ").is_err());
        assert!(KvKey::new("../etc").is_err());
        assert!(KvKey::new("/abs").is_err());
        assert!(KvKey::new("a\nb").is_err());
        assert!(KvKey::new("x".repeat(MAX_KEY_LENGTH + 1)).is_err());
        assert!(KvKey::new("s_location").is_ok());
    }

    #[test]
    fn test_store_keys_are_valid() {
        for key in StoreKey::ALL {
            assert_eq!(KvKey::new(key.as_str()).unwrap(), key.key());
        }
        assert_eq!(StoreKey::Location.as_str(), "s_location");
        assert_eq!(StoreKey::PlaceInfo.as_str(), "s_info");
        assert_eq!(StoreKey::Quiz.as_str(), "s_quiz");
    }

    #[test]
    fn test_batch_limit() {
        let keys = vec![StoreKey::Location.key(); MAX_BATCH_SIZE + 1];
        assert!(matches!(
            KvOperation::get_multi(keys),
            Err(KvError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_stored_ignores_garbage() {
        let value: Option<Vec<u32>> = decode_stored(StoreKey::Quiz, Some("{not json"));
        assert!(value.is_none());
        let value: Option<Vec<u32>> = decode_stored(StoreKey::Quiz, None);
        assert!(value.is_none());
        let value: Option<Vec<u32>> = decode_stored(StoreKey::Quiz, Some("[1,2]"));
        assert_eq!(value, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_memory_store_overwrites() {
        let store = MemoryKvStore::new();
        let key = StoreKey::Location.key();
        store.set(&key, "one".into()).await.unwrap();
        store.set(&key, "two".into()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_execute_get_multi_preserves_order() {
        let store = MemoryKvStore::with_entries([("s_quiz", "[]"), ("s_location", "{}")]);
        let output = store
            .execute(KvOperation::GetMulti {
                keys: StoreKey::ALL.iter().map(StoreKey::key).collect(),
            })
            .await
            .unwrap();
        assert_eq!(
            output,
            KvOutput::Multi(vec![Some("{}".into()), None, Some("[]".into())])
        );
    }

    #[tokio::test]
    async fn test_execute_delete_reports_existence() {
        let store = MemoryKvStore::with_entries([("s_info", "{}")]);
        let key = StoreKey::PlaceInfo.key();
        assert_eq!(
            store.execute(KvOperation::Delete { key: key.clone() }).await,
            Ok(KvOutput::Deleted { existed: true })
        );
        assert_eq!(
            store.execute(KvOperation::Delete { key }).await,
            Ok(KvOutput::Deleted { existed: false })
        );
    }
}
