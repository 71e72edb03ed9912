// Cache module - two-tier read-through / write-through store
//
// Tier 1: in-process map behind a single RwLock (fast, per process)
// Tier 2: DurableStore (survives restarts, shared between processes)
//
// Entries carry their own TTL and are invisible once expired, in both tiers.

mod durable;
mod store;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

use super::models::{DownloadResult, UploadResult, VideoMetadata};

pub use durable::{DurableStore, FileStore};
pub use store::CacheStore;

/// Metadata lives longest; it only changes when the video does
pub const METADATA_TTL: Duration = Duration::from_secs(3600);
/// Upstream download links expire on their own
pub const DOWNLOAD_TTL: Duration = Duration::from_secs(1800);
/// Re-host records point at stored copies and stay valid for a day
pub const REHOST_TTL: Duration = Duration::from_secs(24 * 3600);
/// Interval of the expired-entry sweeper
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Anything the resolver keeps in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    Metadata(VideoMetadata),
    Download(DownloadResult),
    Rehost(UploadResult),
}

/// Snapshot of a cached entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub created_at: OffsetDateTime,
    pub ttl: Duration,
    /// Local reads of this entry, including this one
    pub access_count: u64,
    /// Time left before the entry expires
    pub remaining: Duration,
}

/// Hit/miss counters of a CacheStore
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
}

/// Cache keys used by the orchestrator
pub mod keys {
    use crate::downloader::models::{MediaKind, VideoKey};

    pub fn metadata(video: &VideoKey) -> String {
        format!("meta:{}", video)
    }

    pub fn download(video: &VideoKey, kind: MediaKind, quality: &str, format: &str) -> String {
        format!("download:{}:{}:{}:{}", video, kind, quality, format)
    }

    pub fn rehost(video: &VideoKey, quality: &str) -> String {
        format!("rehost:{}:{}", video, quality)
    }

    /// Key prefixes covering every entry of one video
    pub fn prefixes(video: &VideoKey) -> [String; 3] {
        [
            format!("meta:{}", video),
            format!("download:{}:", video),
            format!("rehost:{}:", video),
        ]
    }
}
