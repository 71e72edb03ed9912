// CacheStore - local map in front of an optional durable tier
//
// The RwLock only guards map operations; it is never held across an await.
// Durable calls are bounded by a timeout and their failures are logged, not
// returned: the local tier alone is a valid (if colder) cache.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use super::durable::DurableStore;
use super::{CacheEntry, CacheStats, CacheValue};
use crate::downloader::errors::StoreError;

/// Default bound on a single durable call
const DURABLE_TIMEOUT: Duration = Duration::from_secs(2);

struct LocalEntry {
    value: CacheValue,
    created_at: OffsetDateTime,
    ttl: Duration,
    expires_at: Instant,
    access_count: AtomicU64,
}

impl LocalEntry {
    fn new(value: CacheValue, created_at: OffsetDateTime, ttl: Duration, remaining: Duration) -> Self {
        Self {
            value,
            created_at,
            ttl,
            expires_at: Instant::now() + remaining,
            access_count: AtomicU64::new(0),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Record format in the durable tier
#[derive(Serialize, Deserialize)]
struct DurableRecord {
    /// Unix milliseconds
    created_at_ms: i64,
    ttl_ms: u64,
    value: CacheValue,
}

impl DurableRecord {
    fn new(value: CacheValue, created_at: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            created_at_ms: unix_ms(created_at),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1),
            value,
        }
    }

    fn created_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.created_at_ms) * 1_000_000).ok()
    }

    fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        let left = self.created_at_ms.saturating_add(ttl).saturating_sub(unix_ms(now));
        (left > 0).then(|| Duration::from_millis(left as u64))
    }
}

fn unix_ms(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Two-tier cache with per-entry TTL
pub struct CacheStore {
    local: RwLock<HashMap<String, LocalEntry>>,
    durable: Option<Arc<dyn DurableStore>>,
    durable_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Local tier only
    pub fn new() -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            durable: None,
            durable_timeout: DURABLE_TIMEOUT,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn with_durable_timeout(mut self, timeout: Duration) -> Self {
        self.durable_timeout = timeout;
        self
    }

    /// Read-through lookup: local tier, then durable tier (which repopulates local)
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.get_local(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "local cache hit");
            return Some(entry);
        }

        if let Some(entry) = self.get_durable(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "durable cache hit");
            return Some(entry);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write-through insert. The local write is immediate; the durable write is best-effort.
    pub async fn put(&self, key: &str, value: CacheValue, ttl: Duration) {
        let created_at = OffsetDateTime::now_utc();
        self.local.write().insert(
            key.to_string(),
            LocalEntry::new(value.clone(), created_at, ttl, ttl),
        );

        let Some(durable) = &self.durable else {
            return;
        };
        let record = DurableRecord::new(value, created_at, ttl);
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode durable record");
                return;
            }
        };
        self.bounded("set", key, durable.set(key, bytes, ttl)).await;
    }

    /// Replace the value of a live local entry, keeping its expiry.
    /// Returns false when the entry is gone or expired.
    pub async fn update(&self, key: &str, value: CacheValue) -> bool {
        let now = Instant::now();
        let record = {
            let mut local = self.local.write();
            let Some(entry) = local.get_mut(key).filter(|e| !e.is_expired(now)) else {
                return false;
            };
            entry.value = value.clone();
            DurableRecord::new(value, entry.created_at, entry.ttl)
        };

        if let Some(durable) = &self.durable {
            let remaining = record
                .remaining(OffsetDateTime::now_utc())
                .unwrap_or(Duration::from_millis(1));
            match serde_json::to_vec(&record) {
                Ok(bytes) => {
                    self.bounded("set", key, durable.set(key, bytes, remaining)).await;
                }
                Err(e) => tracing::warn!(key, error = %e, "failed to encode durable record"),
            }
        }
        true
    }

    /// Remove `key` from both tiers. Returns whether anything was removed.
    pub async fn invalidate(&self, key: &str) -> bool {
        let local_removed = self.local.write().remove(key).is_some();
        let durable_removed = match &self.durable {
            Some(durable) => self
                .bounded("delete", key, durable.delete(key))
                .await
                .unwrap_or(false),
            None => false,
        };
        local_removed || durable_removed
    }

    /// Remove every entry whose key starts with one of `prefixes` from both
    /// tiers, including durable entries this process never loaded.
    /// Returns the larger of the two removal counts.
    pub async fn invalidate_prefixed(&self, prefixes: &[String]) -> usize {
        let local_count = {
            let mut local = self.local.write();
            let before = local.len();
            local.retain(|k, _| !prefixes.iter().any(|p| k.starts_with(p.as_str())));
            before - local.len()
        };

        let mut durable_count = 0;
        if let Some(durable) = &self.durable {
            for prefix in prefixes {
                durable_count += self
                    .bounded("delete_prefixed", prefix, durable.delete_prefixed(prefix))
                    .await
                    .unwrap_or(0);
            }
        }
        tracing::debug!(local = local_count, durable = durable_count, "prefix invalidation");
        local_count.max(durable_count)
    }

    /// Empty both tiers. Returns the larger of the two removal counts
    /// (the tiers usually hold the same keys).
    pub async fn clear(&self) -> usize {
        let local_count = {
            let mut local = self.local.write();
            let count = local.len();
            local.clear();
            count
        };
        let durable_count = match &self.durable {
            Some(durable) => self
                .bounded("clear", "*", durable.clear())
                .await
                .unwrap_or(0),
            None => 0,
        };
        tracing::info!(local = local_count, durable = durable_count, "cache cleared");
        local_count.max(durable_count)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entry_count: self.local.read().len(),
        }
    }

    /// Evict expired local entries. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut local = self.local.write();
        let before = local.len();
        local.retain(|_, entry| !entry.is_expired(now));
        before - local.len()
    }

    /// Run `sweep` every `interval` until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let evicted = store.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "cache sweep");
                }
            }
        })
    }

    fn get_local(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let local = self.local.read();
            match local.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    let access_count = entry.access_count.fetch_add(1, Ordering::Relaxed) + 1;
                    return Some(CacheEntry {
                        value: entry.value.clone(),
                        created_at: entry.created_at,
                        ttl: entry.ttl,
                        access_count,
                        remaining: entry.expires_at.saturating_duration_since(now),
                    });
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict unless someone refreshed it in between
        let mut local = self.local.write();
        if local.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
            local.remove(key);
        }
        None
    }

    async fn get_durable(&self, key: &str) -> Option<CacheEntry> {
        let durable = self.durable.as_ref()?;
        let bytes = self.bounded("get", key, durable.get(key)).await??;

        let record: DurableRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable durable record");
                self.bounded("delete", key, durable.delete(key)).await;
                return None;
            }
        };

        let now = OffsetDateTime::now_utc();
        let remaining = record.remaining(now)?;
        let created_at = record.created_at().unwrap_or(now);
        let ttl = Duration::from_millis(record.ttl_ms);

        self.local.write().insert(
            key.to_string(),
            LocalEntry::new(record.value.clone(), created_at, ttl, remaining),
        );
        let access_count = self
            .local
            .read()
            .get(key)
            .map(|e| e.access_count.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(1);

        Some(CacheEntry {
            value: record.value,
            created_at,
            ttl,
            access_count,
            remaining,
        })
    }

    /// Apply the durable timeout and log failures. `None` on error or timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.durable_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(op, key, error = %e, "durable cache call failed");
                None
            }
            Err(_) => {
                tracing::warn!(op, key, timeout = ?self.durable_timeout, "durable cache call timed out");
                None
            }
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
