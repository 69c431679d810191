use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::{StorageBackend, StorageSettings};
use crate::error::{AttemptError, Result};
use crate::models::PersistedAttempt;

/// Abandoned slots expire from Redis after a week.
const REDIS_SLOT_TTL_SECONDS: u64 = 7 * 24 * 3600;

/// Durable per-assignment slot for in-progress attempts.
///
/// `save` overwrites unconditionally, `clear` is idempotent.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn save(&self, assignment_id: &str, slot: &PersistedAttempt) -> Result<()>;

    async fn load(&self, assignment_id: &str) -> Result<Option<PersistedAttempt>>;

    async fn clear(&self, assignment_id: &str) -> Result<()>;
}

pub fn slot_key(assignment_id: &str) -> String {
    format!("quiz_attempt:{}", assignment_id)
}

/// Unreadable slots are treated like missing ones: the attempt starts fresh.
fn decode_slot(assignment_id: &str, raw: &str) -> Option<PersistedAttempt> {
    match serde_json::from_str(raw) {
        Ok(slot) => Some(slot),
        Err(e) => {
            tracing::warn!(
                "Ignoring unreadable attempt slot for assignment {}: {}",
                assignment_id,
                e
            );
            None
        }
    }
}

pub async fn build_store(settings: &StorageSettings) -> Result<Arc<dyn AttemptStore>> {
    let store: Arc<dyn AttemptStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(MemoryAttemptStore::new()),
        StorageBackend::File => Arc::new(FileAttemptStore::new(settings.dir.clone())),
        StorageBackend::Redis => {
            let uri = settings.redis_uri.clone().ok_or_else(|| {
                AttemptError::Storage("redis backend selected without a redis uri".to_string())
            })?;
            Arc::new(RedisAttemptStore::connect(&uri).await?)
        }
    };
    tracing::info!("Attempt store ready: {:?}", settings.backend);
    Ok(store)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAttemptStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, assignment_id: &str) -> bool {
        self.lock().contains_key(&slot_key(assignment_id))
    }

    /// Writes raw text into a slot, bypassing serialization.
    pub fn put_raw(&self, assignment_id: &str, raw: impl Into<String>) {
        self.lock().insert(slot_key(assignment_id), raw.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn save(&self, assignment_id: &str, slot: &PersistedAttempt) -> Result<()> {
        let raw = serde_json::to_string(slot)?;
        self.lock().insert(slot_key(assignment_id), raw);
        Ok(())
    }

    async fn load(&self, assignment_id: &str) -> Result<Option<PersistedAttempt>> {
        let raw = self.lock().get(&slot_key(assignment_id)).cloned();
        Ok(raw.and_then(|raw| decode_slot(assignment_id, &raw)))
    }

    async fn clear(&self, assignment_id: &str) -> Result<()> {
        self.lock().remove(&slot_key(assignment_id));
        Ok(())
    }
}

/// One JSON file per assignment under a directory.
#[derive(Debug, Clone)]
pub struct FileAttemptStore {
    dir: PathBuf,
}

impl FileAttemptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ids are percent-encoded so distinct ids never share a file.
    pub fn slot_path(&self, assignment_id: &str) -> PathBuf {
        let safe: String = url::form_urlencoded::byte_serialize(assignment_id.as_bytes()).collect();
        self.dir.join(format!("quiz_attempt_{}.json", safe))
    }
}

#[async_trait]
impl AttemptStore for FileAttemptStore {
    async fn save(&self, assignment_id: &str, slot: &PersistedAttempt) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.slot_path(assignment_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(slot)?;

        // rename keeps the previous slot intact if the write is cut short
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, assignment_id: &str) -> Result<Option<PersistedAttempt>> {
        match tokio::fs::read_to_string(self.slot_path(assignment_id)).await {
            Ok(raw) => Ok(decode_slot(assignment_id, &raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, assignment_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.slot_path(assignment_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct RedisAttemptStore {
    redis: ConnectionManager,
}

impl RedisAttemptStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(uri: &str) -> Result<Self> {
        let client = redis::Client::open(uri)?;

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| AttemptError::Storage("Redis connection timeout after 10s".to_string()))??;

        tracing::info!("Redis attempt store connected");
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn save(&self, assignment_id: &str, slot: &PersistedAttempt) -> Result<()> {
        let mut conn = self.redis.clone();
        let raw = serde_json::to_string(slot)?;

        redis::cmd("SETEX")
            .arg(slot_key(assignment_id))
            .arg(REDIS_SLOT_TTL_SECONDS)
            .arg(raw)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn load(&self, assignment_id: &str) -> Result<Option<PersistedAttempt>> {
        let mut conn = self.redis.clone();

        let raw: Option<String> = redis::cmd("GET")
            .arg(slot_key(assignment_id))
            .query_async(&mut conn)
            .await?;

        Ok(raw.and_then(|raw| decode_slot(assignment_id, &raw)))
    }

    async fn clear(&self, assignment_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();

        redis::cmd("DEL")
            .arg(slot_key(assignment_id))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
