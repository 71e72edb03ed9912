// InfoExtractor trait and common types

use async_trait::async_trait;
use std::time::Duration;

use crate::downloader::errors::{ConfigError, FetchError};
use crate::downloader::models::{Rendition, VideoMetadata};

/// Pre-shared key of the savetube payload cipher (AES-128, hex)
pub const DEFAULT_DECRYPTION_KEY: &str = "C5D58EF67A7584E4A29F6C35BBC4EB12";

/// Base of the CDN discovery API
pub const DEFAULT_API_BASE: &str = "https://media.savetube.me/api";

/// Configuration for upstream extraction
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Discovery API base (serves `/random-cdn`)
    pub api_base: String,
    /// Known CDN hosts; empty means "discover one per attempt"
    pub cdn_pool: Vec<String>,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Per-call deadline in seconds
    pub timeout_seconds: u32,
    /// Attempts per operation, first try included
    pub max_attempts: u32,
    /// First backoff delay; doubles every retry
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// 32 hex characters
    pub decryption_key: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            cdn_pool: Vec::new(),
            proxy: None,
            timeout_seconds: 30,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
            decryption_key: DEFAULT_DECRYPTION_KEY.to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_cdn_pool(mut self, pool: Vec<String>) -> Self {
        self.cdn_pool = pool;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_decryption_key(mut self, hex_key: impl Into<String>) -> Self {
        self.decryption_key = hex_key.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    /// Decoded 16-byte key
    pub fn key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let bytes = hex::decode(self.decryption_key.trim()).map_err(|_| ConfigError::InvalidKey)?;
        if bytes.len() != 16 {
            return Err(ConfigError::InvalidKey);
        }
        Ok(bytes)
    }
}

/// Trait for info extractors
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// Fetch and decode metadata for a video URL
    async fn fetch(&self, url: &str) -> Result<VideoMetadata, FetchError>;

    /// Direct media URL for one rendition
    async fn resolve_link(
        &self,
        metadata: &VideoMetadata,
        rendition: &Rendition,
    ) -> Result<String, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_decodes() {
        let config = ExtractorConfig::default();
        assert_eq!(config.key_bytes().unwrap().len(), 16);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_bad_keys_rejected() {
        for key in ["", "C5D58EF6", "zz".repeat(16).as_str()] {
            let config = ExtractorConfig::default().with_decryption_key(key);
            assert!(matches!(config.key_bytes(), Err(ConfigError::InvalidKey)));
        }
    }
}
