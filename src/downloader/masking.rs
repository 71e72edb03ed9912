// URL masking registry - short-lived opaque aliases for direct media URLs
//
// Callers get `/<prefix>/<uuid>/<title>.<ext>` instead of the upstream CDN
// link; the serving layer resolves the uuid back through `resolve`.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::utils::sanitize_filename;

pub const DEFAULT_MASK_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MASK_PREFIX: &str = "/api/proxy";

struct MaskedEntry {
    original_url: String,
    filename: String,
    created_at: OffsetDateTime,
    expires_at: Instant,
    access_count: u64,
    last_accessed: Option<OffsetDateTime>,
}

/// Public view of one alias
#[derive(Debug, Clone, Serialize)]
pub struct MaskedUrlInfo {
    pub masked_id: String,
    pub filename: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub expires_in_secs: u64,
    pub access_count: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_accessed: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MaskingStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub total_accesses: u64,
    pub average_accesses: f64,
}

/// Alias created for a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedUrl {
    pub id: String,
    /// Path the caller should hand out
    pub path: String,
}

pub struct MaskingRegistry {
    entries: Mutex<HashMap<String, MaskedEntry>>,
    prefix: String,
    default_ttl: Duration,
}

impl MaskingRegistry {
    pub fn new(prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            prefix: prefix.into().trim_end_matches('/').to_string(),
            default_ttl,
        }
    }

    /// Register `original_url` under a fresh uuid
    pub fn mask(&self, original_url: &str, title: &str, ext: &str, ttl: Option<Duration>) -> MaskedUrl {
        let id = Uuid::new_v4().to_string();
        let filename = format!("{}.{}", sanitize_filename(title, 80), ext);
        let ttl = ttl.unwrap_or(self.default_ttl);

        self.entries.lock().insert(
            id.clone(),
            MaskedEntry {
                original_url: original_url.to_string(),
                filename: filename.clone(),
                created_at: OffsetDateTime::now_utc(),
                expires_at: Instant::now() + ttl,
                access_count: 0,
                last_accessed: None,
            },
        );
        tracing::debug!(masked_id = %id, ttl = ?ttl, "masked URL created");

        MaskedUrl {
            path: format!("{}/{}/{}", self.prefix, id, filename),
            id,
        }
    }

    /// Original URL behind `masked_id`, counting the access. Expired aliases are dropped.
    pub fn resolve(&self, masked_id: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        if Self::drop_if_expired(&mut entries, masked_id, Instant::now()) {
            tracing::debug!(masked_id, "masked URL expired");
            return None;
        }
        let entry = entries.get_mut(masked_id)?;
        entry.access_count += 1;
        entry.last_accessed = Some(OffsetDateTime::now_utc());
        Some(entry.original_url.clone())
    }

    pub fn info(&self, masked_id: &str) -> Option<MaskedUrlInfo> {
        let entries = self.entries.lock();
        let now = Instant::now();
        entries
            .get(masked_id)
            .filter(|e| now < e.expires_at)
            .map(|e| Self::describe(masked_id, e, now))
    }

    pub fn revoke(&self, masked_id: &str) -> bool {
        let removed = self.entries.lock().remove(masked_id).is_some();
        if removed {
            tracing::info!(masked_id, "masked URL revoked");
        }
        removed
    }

    /// Push the expiry of a live alias further out
    pub fn extend_ttl(&self, masked_id: &str, extra: Duration) -> bool {
        let mut entries = self.entries.lock();
        if Self::drop_if_expired(&mut entries, masked_id, Instant::now()) {
            return false;
        }
        match entries.get_mut(masked_id) {
            Some(entry) => {
                entry.expires_at += extra;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> MaskingStats {
        let entries = self.entries.lock();
        let now = Instant::now();
        let total = entries.len();
        let expired = entries.values().filter(|e| now >= e.expires_at).count();
        let total_accesses: u64 = entries.values().map(|e| e.access_count).sum();
        MaskingStats {
            total,
            active: total - expired,
            expired,
            total_accesses,
            average_accesses: total_accesses as f64 / total.max(1) as f64,
        }
    }

    /// Live aliases, newest first
    pub fn list_active(&self, limit: usize) -> Vec<MaskedUrlInfo> {
        let entries = self.entries.lock();
        let now = Instant::now();
        let mut active: Vec<MaskedUrlInfo> = entries
            .iter()
            .filter(|(_, e)| now < e.expires_at)
            .map(|(id, e)| Self::describe(id, e, now))
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active.truncate(limit);
        active
    }

    /// Drop expired aliases. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let removed = registry.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "masked URL sweep");
                }
            }
        })
    }

    /// Remove `masked_id` if present and expired; true when removed
    fn drop_if_expired(entries: &mut HashMap<String, MaskedEntry>, masked_id: &str, now: Instant) -> bool {
        let expired = entries
            .get(masked_id)
            .is_some_and(|e| now >= e.expires_at);
        if expired {
            entries.remove(masked_id);
        }
        expired
    }

    fn describe(id: &str, entry: &MaskedEntry, now: Instant) -> MaskedUrlInfo {
        MaskedUrlInfo {
            masked_id: id.to_string(),
            filename: entry.filename.clone(),
            created_at: entry.created_at,
            expires_in_secs: entry.expires_at.saturating_duration_since(now).as_secs(),
            access_count: entry.access_count,
            last_accessed: entry.last_accessed,
        }
    }
}

impl Default for MaskingRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_PREFIX, DEFAULT_MASK_TTL)
    }
}
