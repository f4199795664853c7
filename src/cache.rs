use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;
use crate::response::Response;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// String key/value storage with optional per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process store. Expired entries are skipped on read and pruned on
/// write.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CachedEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut found = Vec::new();

        // SCAN instead of KEYS so a large cache does not block the server.
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            found.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }
}

/// Stores analysis responses under `"{key_prefix}:{id}"`.
pub struct ResponseCache {
    store: Box<dyn CacheStore>,
    key_prefix: String,
    expire_seconds: u64,
    list_available: bool,
}

impl ResponseCache {
    pub fn new(store: Box<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            expire_seconds: config.expire_seconds,
            list_available: config.list_available,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let store: Box<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Box::new(MemoryCacheStore::new()),
            CacheBackend::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    CacheError::NotConfigured("redis backend without redis_url".to_string())
                })?;
                Box::new(RedisCacheStore::new(url)?)
            }
        };
        Ok(Self::new(store, config))
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.key_prefix)
    }

    fn ttl(&self) -> Option<Duration> {
        (self.expire_seconds > 0).then(|| Duration::from_secs(self.expire_seconds))
    }

    pub async fn store(&self, response: &Response) -> Result<(), CacheError> {
        let value = response.to_json()?;
        self.store.set(&self.key(&response.id), value, self.ttl()).await?;
        log::debug!("Cached analysis {}", response.id);
        Ok(())
    }

    pub async fn lookup(&self, id: &str) -> Result<Option<Response>, CacheError> {
        match self.store.get(&self.key(id)).await? {
            Some(value) => Ok(Some(Response::from_json(&value)?)),
            None => {
                log::debug!("No cached analysis for {id}");
                Ok(None)
            }
        }
    }

    /// Identifiers of every cached response, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>, CacheError> {
        if !self.list_available {
            return Err(CacheError::ListingDisabled);
        }

        let prefix = format!("{}:", self.key_prefix);
        let mut ids: Vec<String> = self
            .store
            .keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
