//! Fast-tier implementations: an in-process map and redis.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::FastStore;
use crate::error::StoreError;

/// Expiry of `None` means the TTL was too large to represent.
type Entry = (Vec<u8>, Option<Instant>);

fn live(expires: &Option<Instant>, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

/// TTL-aware map used when no redis URL is configured and in tests.
/// Expired entries are swept on every write.
#[derive(Debug, Default)]
pub struct MemoryFastStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| live(expires, now))
            .count()
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires)| live(expires, now));
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "swept expired fast-tier entries");
        }
        entries.insert(key.to_string(), (value, now.checked_add(ttl)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if live(expires, now) => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        debug!(key, "dropping expired fast-tier entry");
        self.entries.write().await.remove(key);
        Ok(None)
    }
}

/// Redis-backed fast tier.
#[derive(Clone)]
pub struct RedisFastStore {
    conn: ConnectionManager,
}

impl RedisFastStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis fast tier");
        Ok(Self { conn })
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1) as usize;
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }
}
