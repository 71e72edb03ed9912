// Request orchestrator - the single entry point of the pipeline
//
// resolve():
//   CacheCheck -> InFlightCheck (join or lead) -> Fetching -> Decoding
//   -> Selecting -> CachePopulate -> Done | Failed
//
// Two single-flight layers keep upstream traffic at one call per key:
// metadata per video, resolved download per (video, kind, quality, format).
// Only successes are cached. Re-hosting runs in the background and patches
// the cached result when it settles; it never fails a resolve.

use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use super::cache::{keys, CacheStore, CacheValue, FileStore};
use super::config::{CacheConfig, ResolverConfig};
use super::errors::{ConfigError, DownloadError};
use super::extractors::{InfoExtractor, SaveTubeClient};
use super::flight::{Role, SingleFlight};
use super::masking::MaskingRegistry;
use super::models::{DownloadResult, MediaKind, RehostStatus, Rendition, VideoKey, VideoMetadata};
use super::selector::VariantSelector;
use super::stats::{ServiceStats, StatsTracker};
use super::traits::{Rehoster, UploadContext};
use super::transport::{ReqwestTransport, Transport};
use super::uploader::TelegramUploader;
use super::utils::build_http_client;

lazy_static::lazy_static! {
    static ref QUALITY_RE: Regex = Regex::new(r"^[a-z0-9]{1,16}$").unwrap();
    static ref FORMAT_RE: Regex = Regex::new(r"^[a-z0-9]{1,8}$").unwrap();
}

/// One resolve call
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub url: String,
    pub kind: MediaKind,
    /// Quality label, "auto" for best available
    pub quality: String,
    /// Container; defaults per kind (mp4 / mp3)
    pub format: Option<String>,
    /// Copy the file into the durable channel in the background
    pub rehost: bool,
}

impl ResolveRequest {
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            quality: "auto".to_string(),
            format: None,
            rehost: false,
        }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Audio,
            ..Self::video(url)
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    pub fn with_rehost(mut self, rehost: bool) -> Self {
        self.rehost = rehost;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub result: DownloadResult,
    /// Served from cache without touching the upstream
    pub cached: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub response_time: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Validated request parameters
struct Normalized {
    video: VideoKey,
    kind: MediaKind,
    quality: String,
    format: String,
    rehost: bool,
}

impl Normalized {
    fn from_request(request: &ResolveRequest) -> Result<Self, DownloadError> {
        let video = VideoKey::from_url(&request.url)?;

        let quality = request.quality.trim().to_lowercase();
        let quality = if quality.is_empty() {
            "auto".to_string()
        } else {
            quality
        };
        if !QUALITY_RE.is_match(&quality) {
            return Err(DownloadError::InvalidInput(format!(
                "unsupported quality: {}",
                request.quality
            )));
        }

        let format = match request.format.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => f.to_lowercase(),
            _ => request.kind.default_format().to_string(),
        };
        if !FORMAT_RE.is_match(&format) {
            return Err(DownloadError::InvalidInput(format!(
                "unsupported format: {}",
                format
            )));
        }

        Ok(Self {
            video,
            kind: request.kind,
            quality,
            format,
            rehost: request.rehost,
        })
    }

    fn cache_key(&self) -> String {
        keys::download(&self.video, self.kind, &self.quality, &self.format)
    }
}

pub struct Downloader {
    extractor: Arc<dyn InfoExtractor>,
    cache: Arc<CacheStore>,
    rehoster: Option<Arc<dyn Rehoster>>,
    masking: Option<Arc<MaskingRegistry>>,
    stats: Arc<StatsTracker>,
    policy: CacheConfig,
    metadata_flight: SingleFlight<Result<VideoMetadata, DownloadError>>,
    download_flight: SingleFlight<Result<DownloadResult, DownloadError>>,
}

impl Downloader {
    pub fn new(extractor: Arc<dyn InfoExtractor>, cache: Arc<CacheStore>) -> Self {
        Self {
            extractor,
            cache,
            rehoster: None,
            masking: None,
            stats: Arc::new(StatsTracker::new()),
            policy: CacheConfig::default(),
            metadata_flight: SingleFlight::new(),
            download_flight: SingleFlight::new(),
        }
    }

    pub fn with_rehoster(mut self, rehoster: Arc<dyn Rehoster>) -> Self {
        self.rehoster = Some(rehoster);
        self
    }

    pub fn with_masking(mut self, masking: Arc<MaskingRegistry>) -> Self {
        self.masking = Some(masking);
        self
    }

    pub fn with_policy(mut self, policy: CacheConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Wire the production stack: reqwest transport, savetube client,
    /// file-backed durable tier, Telegram channel and masking as configured.
    pub async fn from_config(config: &ResolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = build_http_client(config.upstream.proxy.as_deref(), config.upstream.timeout())?;
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(client));
        let extractor = Arc::new(SaveTubeClient::new(config.upstream.clone(), transport.clone())?);

        let mut cache = CacheStore::new().with_durable_timeout(config.cache.durable_timeout);
        if let Some(dir) = &config.cache.durable_dir {
            match FileStore::open(dir).await {
                Ok(store) => cache = cache.with_durable(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "durable cache unavailable, running in-process only")
                }
            }
        }

        let mut downloader =
            Self::new(extractor, Arc::new(cache)).with_policy(config.cache.clone());
        if let Some(upload) = &config.upload {
            downloader =
                downloader.with_rehoster(Arc::new(TelegramUploader::new(upload.clone(), transport)));
        }
        if config.masking.enabled {
            downloader = downloader.with_masking(Arc::new(MaskingRegistry::new(
                config.masking.prefix.clone(),
                config.masking.ttl,
            )));
        }
        Ok(downloader)
    }

    /// Resolve a download link for `request`
    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolveOutcome, DownloadError> {
        let started = Instant::now();
        let _active = self.stats.begin();

        let outcome = self.resolve_inner(&request, started).await;
        match &outcome {
            Ok(o) => tracing::info!(
                url = %request.url,
                cached = o.cached,
                quality = %o.result.rendition.quality,
                elapsed_ms = o.response_time.as_millis() as u64,
                "resolved"
            ),
            Err(e) => {
                self.stats.record_failure();
                tracing::warn!(url = %request.url, kind = ?e.kind(), error = %e, "resolve failed");
            }
        }
        outcome
    }

    async fn resolve_inner(
        &self,
        request: &ResolveRequest,
        started: Instant,
    ) -> Result<ResolveOutcome, DownloadError> {
        let normalized = Normalized::from_request(request)?;
        let key = normalized.cache_key();

        // CacheCheck
        if let Some(entry) = self.cache.get(&key).await {
            let upgrade = normalized.rehost && self.rehoster.is_some();
            match entry.value {
                // Cached without re-hosting; resolve again so the upload gets planned
                CacheValue::Download(result)
                    if upgrade && result.rehost == RehostStatus::NotRequested => {}
                CacheValue::Download(result) => {
                    self.stats.record_hit();
                    tracing::debug!(key = %key, access_count = entry.access_count, "download cache hit");
                    return Ok(ResolveOutcome {
                        result,
                        cached: true,
                        response_time: started.elapsed(),
                    });
                }
                _ => {}
            }
        }
        self.stats.record_miss();

        // InFlightCheck. A re-host request never joins a plain flight,
        // whose result would come back without an upload planned.
        let flight_key = if normalized.rehost && self.rehoster.is_some() {
            format!("{}:rehost", key)
        } else {
            key.clone()
        };
        let (outcome, role) = self
            .download_flight
            .run(&flight_key, || self.fetch_download(&normalized, &request.url, &key))
            .await;
        if role == Role::Joined {
            self.stats.record_joined();
            tracing::debug!(key = %flight_key, "joined in-flight resolve");
        }

        Ok(ResolveOutcome {
            result: outcome?,
            cached: false,
            response_time: started.elapsed(),
        })
    }

    /// Fetching -> Decoding -> Selecting -> CachePopulate (leader only)
    async fn fetch_download(
        &self,
        request: &Normalized,
        source_url: &str,
        key: &str,
    ) -> Result<DownloadResult, DownloadError> {
        let (metadata, _) = self.metadata(&request.video).await?;

        let rendition = VariantSelector::select_with_format(
            &metadata,
            request.kind,
            &request.quality,
            Some(&request.format),
        )?
        .clone();
        tracing::debug!(
            video = %request.video,
            requested = %request.quality,
            selected = %rendition.quality,
            "rendition selected"
        );

        let direct_url = self.extractor.resolve_link(&metadata, &rendition).await?;

        let masked_url = self.masking.as_ref().map(|registry| {
            registry
                .mask(
                    &direct_url,
                    &metadata.title,
                    &request.format,
                    Some(self.policy.download_ttl),
                )
                .path
        });

        let mut result = DownloadResult {
            video_id: request.video.clone(),
            source_url: source_url.to_string(),
            title: metadata.title.clone(),
            rendition: rendition.clone(),
            format: request.format.clone(),
            direct_url,
            masked_url,
            durable_url: None,
            rehost: RehostStatus::NotRequested,
            resolved_at: OffsetDateTime::now_utc(),
        };

        let upload_job = if request.rehost {
            self.plan_rehost(&mut result, &metadata, &rendition).await
        } else {
            None
        };

        self.cache
            .put(key, CacheValue::Download(result.clone()), self.policy.download_ttl)
            .await;

        if let Some((rehoster, size_bytes, context)) = upload_job {
            self.spawn_rehost(rehoster, result.clone(), size_bytes, context, key.to_string());
        }
        Ok(result)
    }

    /// Metadata through cache and the metadata flight. The flag is true on a cache hit.
    async fn metadata(&self, video: &VideoKey) -> Result<(VideoMetadata, bool), DownloadError> {
        let key = keys::metadata(video);
        if let Some(entry) = self.cache.get(&key).await {
            if let CacheValue::Metadata(metadata) = entry.value {
                return Ok((metadata, true));
            }
        }

        let (outcome, role) = self
            .metadata_flight
            .run(video.as_str(), || self.fetch_metadata(video, &key))
            .await;
        if role == Role::Joined {
            self.stats.record_joined();
        }
        outcome.map(|metadata| (metadata, false))
    }

    async fn fetch_metadata(&self, video: &VideoKey, key: &str) -> Result<VideoMetadata, DownloadError> {
        self.stats.record_fetch();
        tracing::debug!(extractor = self.extractor.name(), video = %video, "fetching metadata");
        let metadata = self.extractor.fetch(&video.canonical_url()).await?;
        self.cache
            .put(
                key,
                CacheValue::Metadata(metadata.clone()),
                self.policy.metadata_ttl,
            )
            .await;
        Ok(metadata)
    }

    /// Decide the re-host state of a fresh result. Returns the upload to start, if any.
    async fn plan_rehost(
        &self,
        result: &mut DownloadResult,
        metadata: &VideoMetadata,
        rendition: &Rendition,
    ) -> Option<(Arc<dyn Rehoster>, u64, UploadContext)> {
        let Some(rehoster) = self.rehoster.clone() else {
            tracing::debug!(video = %result.video_id, "re-host requested but no channel configured");
            return None;
        };

        // A previous upload of the same video and quality is reused
        let record_key = keys::rehost(&result.video_id, &rendition.quality);
        if let Some(entry) = self.cache.get(&record_key).await {
            if let CacheValue::Rehost(upload) = entry.value {
                result.durable_url = Some(upload.reference_url);
                result.rehost = RehostStatus::Stored;
                return None;
            }
        }

        let Some(size_bytes) = rendition.size_bytes else {
            result.rehost = RehostStatus::Failed {
                reason: "file size unknown".to_string(),
            };
            return None;
        };
        let limit = rehoster.max_upload_bytes();
        if size_bytes > limit {
            tracing::info!(
                channel = rehoster.name(),
                video = %result.video_id,
                size_bytes,
                limit,
                "file too large to re-host"
            );
            result.rehost = RehostStatus::Failed {
                reason: format!("file of {} bytes exceeds the {} byte upload limit", size_bytes, limit),
            };
            return None;
        }

        result.rehost = RehostStatus::Pending;
        let context = UploadContext {
            video_id: result.video_id.clone(),
            title: metadata.title.clone(),
            quality: rendition.quality.clone(),
            duration_secs: metadata.duration_secs,
            uploader: metadata.uploader.clone(),
        };
        Some((rehoster, size_bytes, context))
    }

    fn spawn_rehost(
        &self,
        rehoster: Arc<dyn Rehoster>,
        pending: DownloadResult,
        size_bytes: u64,
        context: UploadContext,
        download_key: String,
    ) {
        let cache = self.cache.clone();
        let stats = self.stats.clone();
        let rehost_ttl = self.policy.rehost_ttl;

        tokio::spawn(async move {
            let mut settled = pending;
            match rehoster.upload(&settled.direct_url, size_bytes, &context).await {
                Ok(upload) => {
                    stats.record_upload(true);
                    settled.durable_url = Some(upload.reference_url.clone());
                    settled.rehost = RehostStatus::Stored;
                    let record_key = keys::rehost(&context.video_id, &context.quality);
                    cache
                        .put(&record_key, CacheValue::Rehost(upload), rehost_ttl)
                        .await;
                }
                Err(e) => {
                    stats.record_upload(false);
                    tracing::warn!(
                        channel = rehoster.name(),
                        video = %context.video_id,
                        error = %e,
                        "re-host failed"
                    );
                    settled.rehost = RehostStatus::Failed {
                        reason: e.to_string(),
                    };
                }
            }

            if !cache.update(&download_key, CacheValue::Download(settled)).await {
                tracing::debug!(key = %download_key, "download entry gone before re-host settled");
            }
        });
    }

    /// Metadata only, cached and deduplicated like `resolve`
    pub async fn video_info(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        let _active = self.stats.begin();
        let video = VideoKey::from_url(url).map_err(DownloadError::from)?;

        match self.metadata(&video).await {
            Ok((metadata, cached)) => {
                if cached {
                    self.stats.record_hit();
                } else {
                    self.stats.record_miss();
                }
                Ok(metadata)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    /// Original URL behind a masked id
    pub fn lookup_masked(&self, masked_id: &str) -> Option<String> {
        self.masking.as_ref()?.resolve(masked_id)
    }

    /// Drop everything cached for the video behind `url`
    pub async fn invalidate(&self, url: &str) -> Result<usize, DownloadError> {
        let video = VideoKey::from_url(url)?;
        let removed = self.cache.invalidate_prefixed(&keys::prefixes(&video)).await;
        tracing::info!(video = %video, removed, "cache invalidated");
        Ok(removed)
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.clear().await
    }

    pub fn stats(&self) -> ServiceStats {
        let masked = self
            .masking
            .as_ref()
            .map(|m| m.stats().active)
            .unwrap_or(0);
        self.stats.snapshot(self.cache.stats().entry_count, masked)
    }

    /// Start the periodic sweepers (cache and masked URLs)
    pub fn start_maintenance(&self) -> Vec<JoinHandle<()>> {
        let interval = self.policy.sweep_interval;
        let mut handles = vec![self.cache.spawn_sweeper(interval)];
        if let Some(masking) = &self.masking {
            handles.push(masking.spawn_sweeper(interval));
        }
        tracing::info!(interval = ?interval, "maintenance started");
        handles
    }
}
