// Resolver configuration - built once at startup, immutable afterwards
//
// Sources, in order: defaults, then environment (optionally loaded from .env
// by the binary). `validate` rejects inconsistent combinations early.

use std::path::PathBuf;
use std::time::Duration;

use super::cache::{DOWNLOAD_TTL, METADATA_TTL, REHOST_TTL, SWEEP_INTERVAL};
use super::errors::ConfigError;
use super::extractors::ExtractorConfig;
use super::masking::{DEFAULT_MASK_PREFIX, DEFAULT_MASK_TTL};
use super::uploader::UploadConfig;

/// Cache tiers and TTL policy
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub metadata_ttl: Duration,
    pub download_ttl: Duration,
    pub rehost_ttl: Duration,
    /// Durable tier directory; `None` keeps the cache in-process only
    pub durable_dir: Option<PathBuf>,
    pub durable_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_ttl: METADATA_TTL,
            download_ttl: DOWNLOAD_TTL,
            rehost_ttl: REHOST_TTL,
            durable_dir: None,
            durable_timeout: Duration::from_secs(2),
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_durable_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.durable_dir = dir;
        self
    }

    pub fn with_ttls(mut self, metadata: Duration, download: Duration) -> Self {
        self.metadata_ttl = metadata;
        self.download_ttl = download;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MaskingConfig {
    pub enabled: bool,
    pub prefix: String,
    pub ttl: Duration,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: DEFAULT_MASK_PREFIX.to_string(),
            ttl: DEFAULT_MASK_TTL,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub upstream: ExtractorConfig,
    pub cache: CacheConfig,
    /// Re-hosting is off unless a channel is configured
    pub upload: Option<UploadConfig>,
    pub masking: MaskingConfig,
}

impl ResolverConfig {
    pub fn with_upstream(mut self, upstream: ExtractorConfig) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_upload(mut self, upload: Option<UploadConfig>) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_masking(mut self, masking: MaskingConfig) -> Self {
        self.masking = masking;
        self
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup` (environment-like source)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut upstream = ExtractorConfig::default();
        if let Some(pool) = get("RESOLVER_CDN_POOL") {
            upstream.cdn_pool = pool
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(base) = get("RESOLVER_API_BASE") {
            upstream.api_base = base;
        }
        upstream.proxy = get("RESOLVER_PROXY");
        if let Some(v) = get("RESOLVER_TIMEOUT_SECS") {
            upstream.timeout_seconds = parse_num("RESOLVER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RESOLVER_MAX_ATTEMPTS") {
            upstream.max_attempts = parse_num("RESOLVER_MAX_ATTEMPTS", &v)?;
        }
        if let Some(key) = get("RESOLVER_DECRYPTION_KEY") {
            upstream.decryption_key = key;
        }

        let mut cache = CacheConfig::default();
        if let Some(v) = get("CACHE_METADATA_TTL_SECS") {
            cache.metadata_ttl = parse_secs("CACHE_METADATA_TTL_SECS", &v)?;
        }
        if let Some(v) = get("CACHE_DOWNLOAD_TTL_SECS") {
            cache.download_ttl = parse_secs("CACHE_DOWNLOAD_TTL_SECS", &v)?;
        }
        if let Some(v) = get("CACHE_REHOST_TTL_SECS") {
            cache.rehost_ttl = parse_secs("CACHE_REHOST_TTL_SECS", &v)?;
        }
        if let Some(v) = get("CACHE_SWEEP_SECS") {
            cache.sweep_interval = parse_secs("CACHE_SWEEP_SECS", &v)?;
        }
        let durable = match get("CACHE_DURABLE") {
            Some(v) => parse_bool("CACHE_DURABLE", &v)?,
            None => true,
        };
        cache.durable_dir = if durable {
            get("CACHE_DIR")
                .map(PathBuf::from)
                .or_else(|| dirs::cache_dir().map(|d| d.join("youtube-resolver")))
        } else {
            None
        };

        let upload = match (get("BOT_TOKEN"), get("CHANNEL_ID")) {
            (Some(token), Some(channel)) => {
                let mut upload = UploadConfig::new(token, channel);
                if let Some(v) = get("UPLOAD_MAX_BYTES") {
                    upload = upload.with_max_upload_bytes(parse_num("UPLOAD_MAX_BYTES", &v)?);
                }
                if let Some(v) = get("UPLOAD_TIMEOUT_SECS") {
                    upload = upload.with_transfer_timeout(parse_secs("UPLOAD_TIMEOUT_SECS", &v)?);
                }
                if let Some(v) = get("UPLOAD_STREAM_URL") {
                    upload = upload.with_stream_url(parse_bool("UPLOAD_STREAM_URL", &v)?);
                }
                Some(upload)
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::Inconsistent(
                    "BOT_TOKEN and CHANNEL_ID must be set together".to_string(),
                ))
            }
        };

        let mut masking = MaskingConfig::default();
        if let Some(v) = get("MASKING_ENABLED") {
            masking.enabled = parse_bool("MASKING_ENABLED", &v)?;
        }
        if let Some(prefix) = get("MASKING_PREFIX") {
            masking.prefix = prefix;
        }
        if let Some(v) = get("MASKING_TTL_SECS") {
            masking.ttl = parse_secs("MASKING_TTL_SECS", &v)?;
        }

        let config = Self::default()
            .with_upstream(upstream)
            .with_cache(cache)
            .with_upload(upload)
            .with_masking(masking);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream.key_bytes()?;

        if self.upstream.timeout_seconds == 0 {
            return Err(invalid("RESOLVER_TIMEOUT_SECS", "0"));
        }
        if self.upstream.max_attempts == 0 {
            return Err(invalid("RESOLVER_MAX_ATTEMPTS", "0"));
        }
        if self.upstream.cdn_pool.is_empty() && self.upstream.api_base.is_empty() {
            return Err(ConfigError::Inconsistent(
                "either a CDN pool or a discovery API base is required".to_string(),
            ));
        }

        for (name, ttl) in [
            ("CACHE_METADATA_TTL_SECS", self.cache.metadata_ttl),
            ("CACHE_DOWNLOAD_TTL_SECS", self.cache.download_ttl),
            ("CACHE_REHOST_TTL_SECS", self.cache.rehost_ttl),
            ("CACHE_SWEEP_SECS", self.cache.sweep_interval),
        ] {
            if ttl.is_zero() {
                return Err(invalid(name, "0"));
            }
        }

        if let Some(upload) = &self.upload {
            if upload.bot_token.is_empty() || upload.channel_id.is_empty() {
                return Err(ConfigError::Inconsistent(
                    "re-hosting needs both a bot token and a channel id".to_string(),
                ));
            }
            if upload.max_upload_bytes == 0 {
                return Err(invalid("UPLOAD_MAX_BYTES", "0"));
            }
        }

        if self.masking.enabled && !self.masking.prefix.starts_with('/') {
            return Err(invalid("MASKING_PREFIX", &self.masking.prefix));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(name, value))
}

fn parse_secs(name: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_num::<u64>(name, value).map(Duration::from_secs)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}
