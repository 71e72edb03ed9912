// Durable tier - contract plus a file-backed implementation
//
// FileStore layout (one pair per key):
//   <dir>/<sha256(key)>        raw value bytes
//   <dir>/<sha256(key)>.meta   expiry as unix milliseconds, then the key on a second line
// Writes go to a temp file first and are renamed into place.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::fs;

use crate::downloader::errors::StoreError;

/// Key/value store with per-entry expiry that outlives the process
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Value for `key`, or `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every entry whose key starts with `prefix`; returns how many went
    async fn delete_prefixed(&self, prefix: &str) -> Result<usize, StoreError>;

    /// Returns the number of removed entries
    async fn clear(&self) -> Result<usize, StoreError>;
}

const META_EXT: &str = "meta";
const TMP_PREFIX: &str = ".tmp-";

/// Directory-backed durable store
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(hex::encode(hasher.finalize()))
    }

    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = self
            .dir
            .join(format!("{}{}", TMP_PREFIX, uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_pair(&self, data_path: &Path) -> Result<bool, StoreError> {
        let meta_removed = remove_if_exists(&data_path.with_extension(META_EXT)).await?;
        let data_removed = remove_if_exists(data_path).await?;
        Ok(meta_removed || data_removed)
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn now_unix_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Split a meta file into its expiry and (when present) the stored key
fn parse_meta(meta: &str) -> Option<(i64, Option<&str>)> {
    let (expiry, key) = match meta.split_once('\n') {
        Some((expiry, key)) => (expiry, Some(key.trim_end_matches('\n'))),
        None => (meta, None),
    };
    Some((expiry.trim().parse().ok()?, key))
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let data_path = self.entry_path(key);
        let meta_path = data_path.with_extension(META_EXT);

        let meta = match fs::read_to_string(&meta_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (expires_at, _) = parse_meta(&meta)
            .ok_or_else(|| StoreError::Corrupt(format!("bad expiry in {}", meta_path.display())))?;

        if now_unix_ms() >= expires_at {
            self.remove_pair(&data_path).await?;
            return Ok(None);
        }

        match fs::read(&data_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let data_path = self.entry_path(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_unix_ms().saturating_add(ttl_ms.max(1));

        // Data first: a meta file only ever points at complete data
        self.write_atomic(&data_path, &value).await?;
        self.write_atomic(
            &data_path.with_extension(META_EXT),
            format!("{}\n{}", expires_at, key).as_bytes(),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.remove_pair(&self.entry_path(key)).await
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            let meta = match fs::read_to_string(&path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let matches = parse_meta(&meta)
                .and_then(|(_, key)| key)
                .is_some_and(|key| key.starts_with(prefix));
            if matches && self.remove_pair(&path.with_extension("")).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some(META_EXT) {
                removed += 1;
            }
            remove_if_exists(&path).await?;
        }
        Ok(removed)
    }
}
