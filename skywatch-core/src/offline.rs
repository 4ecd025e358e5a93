//! TTL cache of weather payloads, the last-sync timestamp and the queue of
//! user actions waiting for connectivity.
//!
//! Every record is a JSON document under one key of a [`KeyValueStore`];
//! concurrent writers follow last-write-wins.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{WeatherError, model::Place, store::KeyValueStore};

const CACHE_PREFIX: &str = "cache:";
const LAST_SYNC_KEY: &str = "meta:last_sync";
const QUEUE_KEY: &str = "queue:actions";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    payload: T,
}

/// A payload read back from the cache.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Past its TTL but still inside the grace period.
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub bytes: usize,
    pub oldest: Option<DateTime<Utc>>,
}

/// A user change made while offline, replayed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfflineAction {
    AddCity { place: Place },
    RemoveCity { key: String, name: String },
    UpdateSetting { key: String, value: serde_json::Value },
}

impl OfflineAction {
    pub fn describe(&self) -> String {
        match self {
            OfflineAction::AddCity { place } => format!("add city {}", place.display_name()),
            OfflineAction::RemoveCity { name, .. } => format!("remove city {name}"),
            OfflineAction::UpdateSetting { key, value } => format!("set {key} = {value}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub action: OfflineAction,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfflineStorage {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    stale_grace: Duration,
    // Serializes read-modify-write of the queue document.
    queue_lock: Arc<Mutex<()>>,
}

impl OfflineStorage {
    pub const DEFAULT_TTL_MINUTES: i64 = 30;

    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: Duration::minutes(Self::DEFAULT_TTL_MINUTES),
            stale_grace: Duration::hours(24),
            queue_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cache_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    pub async fn cache_weather<T: Serialize + Sync>(&self, key: &str, payload: &T) -> Result<()> {
        self.cache_weather_with_ttl(key, payload, self.ttl).await
    }

    pub async fn cache_weather_with_ttl<T: Serialize + Sync>(
        &self,
        key: &str,
        payload: &T,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).ok_or(WeatherError::OutOfRange("cache TTL"))?;
        let entry = CacheEntry { stored_at: now, expires_at, payload };
        let json = serde_json::to_string(&entry).context("Failed to serialize cache entry")?;
        self.store.set(&Self::cache_key(key), &json).await?;
        tracing::debug!(key, expires_at = %entry.expires_at, "cached payload");
        Ok(())
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let full = Self::cache_key(key);
        let Some(raw) = self.store.get(&full).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A payload from an older schema is as good as a miss.
                tracing::warn!(key, error = %e, "dropping unreadable cache entry");
                self.store.remove(&full).await?;
                Ok(None)
            }
        }
    }

    /// An entry whose grace period would end past the representable range never expires.
    fn past_grace(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expires_at.checked_add_signed(self.stale_grace).is_some_and(|limit| now > limit)
    }

    /// Fresh payload for `key`, if any. Entries beyond the grace period are deleted.
    pub async fn get_cached_weather<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>> {
        Ok(self.get_stale_weather(key).await?.filter(|c| !c.stale))
    }

    /// Like [`Self::get_cached_weather`] but also returns expired payloads still inside the grace period.
    pub async fn get_stale_weather<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>> {
        let Some(entry) = self.read_entry::<T>(key).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if self.past_grace(entry.expires_at, now) {
            self.store.remove(&Self::cache_key(key)).await?;
            return Ok(None);
        }

        Ok(Some(Cached {
            value: entry.payload,
            stored_at: entry.stored_at,
            expires_at: entry.expires_at,
            stale: now > entry.expires_at,
        }))
    }

    /// Remove cache entries past expiry plus grace. Returns how many were removed.
    pub async fn clear_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for full in self.store.keys(CACHE_PREFIX).await? {
            let expired = match self.store.get(&full).await? {
                Some(raw) => match serde_json::from_str::<CacheEntry<serde::de::IgnoredAny>>(&raw) {
                    Ok(entry) => self.past_grace(entry.expires_at, now),
                    Err(_) => true,
                },
                None => false,
            };
            if expired {
                self.store.remove(&full).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "pruned expired cache entries");
        }
        Ok(removed)
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        let keys = self.store.keys(CACHE_PREFIX).await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        Ok(keys.len())
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        let mut stats = CacheStats::default();

        for full in self.store.keys(CACHE_PREFIX).await? {
            let Some(raw) = self.store.get(&full).await? else { continue };
            let Ok(entry) = serde_json::from_str::<CacheEntry<serde::de::IgnoredAny>>(&raw) else {
                continue;
            };
            stats.entries += 1;
            stats.bytes += raw.len();
            if now > entry.expires_at {
                stats.stale += 1;
            } else {
                stats.fresh += 1;
            }
            stats.oldest = Some(stats.oldest.map_or(entry.stored_at, |o| o.min(entry.stored_at)));
        }

        Ok(stats)
    }

    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        match self.store.get(LAST_SYNC_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).context("Corrupt last-sync timestamp")?)),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(LAST_SYNC_KEY, &serde_json::to_string(&at)?).await
    }

    async fn read_queue(&self) -> Result<Vec<PendingAction>> {
        match self.store.get(QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse offline action queue"),
            None => Ok(Vec::new()),
        }
    }

    async fn write_queue(&self, queue: &[PendingAction]) -> Result<()> {
        let json = serde_json::to_string(queue).context("Failed to serialize offline action queue")?;
        self.store.set(QUEUE_KEY, &json).await
    }

    pub async fn queue_action(&self, action: OfflineAction) -> Result<PendingAction> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.read_queue().await?;
        let pending = PendingAction {
            id: Uuid::new_v4(),
            action,
            queued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        };
        tracing::debug!(id = %pending.id, action = %pending.action.describe(), "queued offline action");
        queue.push(pending.clone());
        self.write_queue(&queue).await?;
        Ok(pending)
    }

    /// Queued actions, oldest first.
    pub async fn pending_actions(&self) -> Result<Vec<PendingAction>> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.read_queue().await?;
        queue.sort_by_key(|a| a.queued_at);
        Ok(queue)
    }

    pub async fn remove_action(&self, id: Uuid) -> Result<bool> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.read_queue().await?;
        let before = queue.len();
        queue.retain(|a| a.id != id);
        let removed = queue.len() != before;
        if removed {
            self.write_queue(&queue).await?;
        }
        Ok(removed)
    }

    /// Bump the attempt counter of an action. Returns the new count, or `None` if it is gone.
    pub async fn record_failed_attempt(&self, id: Uuid, error: &str) -> Result<Option<u32>> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.read_queue().await?;
        let Some(action) = queue.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        action.attempts += 1;
        action.last_error = Some(error.to_string());
        let attempts = action.attempts;
        self.write_queue(&queue).await?;
        Ok(Some(attempts))
    }

    pub async fn clear_queue(&self) -> Result<()> {
        let _guard = self.queue_lock.lock().await;
        self.store.remove(QUEUE_KEY).await
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }
}
