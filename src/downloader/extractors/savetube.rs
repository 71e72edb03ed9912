// SaveTube extractor - CDN pool, retry with backoff, encrypted payloads
//
// Flow per operation:
// 1. Shuffle the configured CDN pool (or discover a host when it is empty)
// 2. POST to the host; transient failures move on to the next host after a backoff
// 3. Hand the `data` field to the decoder
//
// Rejections and decode failures are final: another host will say the same.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

use super::traits::{ExtractorConfig, InfoExtractor};
use crate::downloader::decoder;
use crate::downloader::errors::{ConfigError, FetchError, TransportError};
use crate::downloader::models::{MediaKind, Rendition, VideoKey, VideoMetadata};
use crate::downloader::transport::{HttpReply, Transport};
use crate::downloader::utils::{backoff_delay, redact_url};

/// Response envelope shared by every upstream endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CdnReply {
    cdn: Option<String>,
}

pub struct SaveTubeClient {
    config: ExtractorConfig,
    key: Vec<u8>,
    transport: Arc<dyn Transport>,
}

impl SaveTubeClient {
    pub fn new(config: ExtractorConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let key = config.key_bytes()?;
        Ok(Self {
            config,
            key,
            transport,
        })
    }

    /// Pool order for one operation
    fn shuffled_pool(&self) -> Vec<String> {
        let mut hosts = self.config.cdn_pool.clone();
        hosts.shuffle(&mut rand::rng());
        hosts
    }

    fn endpoint(host: &str, path: &str) -> String {
        let host = host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}{}", host, path)
        } else {
            format!("https://{}{}", host, path)
        }
    }

    fn map_transport(&self, e: TransportError) -> FetchError {
        match e {
            TransportError::Timeout => FetchError::Timeout(self.config.timeout()),
            other => FetchError::UpstreamUnavailable(other.to_string()),
        }
    }

    /// Run one transport call under the configured deadline
    async fn timed<F>(&self, call: F) -> Result<HttpReply, FetchError>
    where
        F: Future<Output = Result<HttpReply, TransportError>>,
    {
        match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(self.map_transport(e)),
            Err(_) => Err(FetchError::Timeout(self.config.timeout())),
        }
    }

    /// Ask the discovery API for a CDN host
    async fn discover_cdn(&self) -> Result<String, FetchError> {
        let url = format!("{}/random-cdn", self.config.api_base.trim_end_matches('/'));
        let reply = self.timed(self.transport.get(&url)).await?;
        if !reply.is_success() {
            return Err(FetchError::UpstreamUnavailable(format!(
                "CDN discovery returned HTTP {}",
                reply.status
            )));
        }
        let parsed: CdnReply = reply
            .json()
            .map_err(|e| FetchError::UpstreamUnavailable(format!("bad CDN reply: {}", e)))?;
        let cdn = parsed
            .cdn
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| FetchError::UpstreamUnavailable("CDN reply has no host".to_string()))?;
        tracing::debug!(cdn = %cdn, "discovered CDN host");
        Ok(cdn)
    }

    /// Retry `call` over the pool with exponential backoff on transient failures
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let hosts = self.shuffled_pool();
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let outcome = match hosts.get((attempt as usize - 1) % hosts.len().max(1)) {
                Some(host) => call(host.clone()).await,
                None => match self.discover_cdn().await {
                    Ok(host) => call(host).await,
                    Err(e) => Err(e),
                },
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(op, attempt, "upstream call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(op, attempt, max_attempts, error = %e, "upstream attempt failed");
                    if attempt < max_attempts {
                        let delay =
                            backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(op, attempt, error = %e, "upstream call failed permanently");
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::UpstreamUnavailable("no attempt was made".to_string())))
    }

    /// Parse an envelope, mapping refusals and malformed bodies
    fn open_envelope(reply: &HttpReply) -> Result<Value, FetchError> {
        if !reply.is_success() {
            return Err(FetchError::UpstreamUnavailable(format!(
                "HTTP {}: {}",
                reply.status,
                reply.text_lossy(120)
            )));
        }
        if reply.body.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::UpstreamUnavailable("empty body".to_string()));
        }
        let envelope: Envelope = reply
            .json()
            .map_err(|e| FetchError::UpstreamUnavailable(format!("bad envelope: {}", e)))?;
        if !envelope.status {
            return Err(FetchError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request refused".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| FetchError::UpstreamUnavailable("envelope has no data".to_string()))
    }

    async fn request_info(&self, host: String, video: &VideoKey) -> Result<VideoMetadata, FetchError> {
        let url = Self::endpoint(&host, "/v2/info");
        tracing::debug!(cdn = %host, video = %video, "requesting info");

        let reply = self
            .timed(
                self.transport
                    .post_json(&url, &json!({ "url": video.canonical_url() })),
            )
            .await?;
        let data = Self::open_envelope(&reply)?;
        let payload = data
            .as_str()
            .ok_or_else(|| FetchError::UpstreamUnavailable("info data is not a string".to_string()))?;

        Ok(decoder::decode_for(payload.as_bytes(), &self.key, video)?)
    }

    async fn request_link(
        &self,
        host: String,
        kind: MediaKind,
        quality: &str,
        upstream_key: &str,
    ) -> Result<String, FetchError> {
        let url = Self::endpoint(&host, "/download");
        tracing::debug!(cdn = %host, kind = %kind, quality, "requesting download link");

        let body = json!({
            "downloadType": kind.as_str(),
            "quality": quality,
            "key": upstream_key,
        });
        let reply = self.timed(self.transport.post_json(&url, &body)).await?;
        let data = Self::open_envelope(&reply)?;

        data.get("downloadUrl")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FetchError::UpstreamUnavailable("reply has no downloadUrl".to_string()))
    }
}

#[async_trait]
impl InfoExtractor for SaveTubeClient {
    fn name(&self) -> &'static str {
        "savetube"
    }

    async fn fetch(&self, url: &str) -> Result<VideoMetadata, FetchError> {
        let video = VideoKey::from_url(url)?;
        let metadata = self
            .with_retry("info", |host| self.request_info(host, &video))
            .await?;
        tracing::info!(
            video = %video,
            title = %metadata.title,
            renditions = metadata.renditions().len(),
            "fetched video info"
        );
        Ok(metadata)
    }

    async fn resolve_link(
        &self,
        metadata: &VideoMetadata,
        rendition: &Rendition,
    ) -> Result<String, FetchError> {
        if let Some(url) = rendition.url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }

        let quality = rendition.upstream_quality();
        let link = self
            .with_retry("link", |host| {
                self.request_link(host, rendition.kind, &quality, &metadata.upstream_key)
            })
            .await?;
        tracing::debug!(
            video = %metadata.video_id,
            quality = %rendition.quality,
            link = %redact_url(&link, 80),
            "resolved download link"
        );
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::DecodeError;
    use crate::testing::{fixtures, Scripted, ScriptedTransport};
    use std::time::Duration;

    const URL: &str = "https://youtu.be/Qrhl4uxAeu8";

    fn config(pool: &[&str]) -> ExtractorConfig {
        ExtractorConfig::default()
            .with_cdn_pool(pool.iter().map(|h| h.to_string()).collect())
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
    }

    fn client(transport: &Arc<ScriptedTransport>, config: ExtractorConfig) -> SaveTubeClient {
        SaveTubeClient::new(config, transport.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_decodes_payload() {
        let transport = Arc::new(
            ScriptedTransport::new().on("POST", "/v2/info", Scripted::json(fixtures::info_envelope())),
        );
        let client = client(&transport, config(&["cdn1.example"]));

        let meta = client.fetch(URL).await.unwrap();
        assert_eq!(meta.video_id.as_str(), fixtures::VIDEO_ID);
        assert_eq!(meta.title, fixtures::TITLE);
        assert_eq!(transport.calls_to("/v2/info"), 1);

        let sent = transport.last_body("/v2/info").unwrap();
        assert_eq!(sent["url"], "https://www.youtube.com/watch?v=Qrhl4uxAeu8");
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_call() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(&transport, config(&["cdn1.example"]));

        let err = client.fetch("https://example.com/video").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_on_next_host() {
        let transport = Arc::new(
            ScriptedTransport::new().on_sequence(
                "POST",
                "/v2/info",
                vec![
                    Scripted::status(503, "busy"),
                    Scripted::json(fixtures::info_envelope()),
                ],
            ),
        );
        let client = client(&transport, config(&["cdn1.example", "cdn2.example"]));

        assert!(client.fetch(URL).await.is_ok());

        let hosts = transport.hosts_for("/v2/info");
        assert_eq!(hosts.len(), 2);
        assert_ne!(hosts[0], hosts[1]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_unavailable() {
        let transport = Arc::new(
            ScriptedTransport::new().on("POST", "/v2/info", Scripted::status(502, "bad gateway")),
        );
        let client = client(&transport, config(&["cdn1.example"]).with_max_attempts(3));

        let err = client.fetch(URL).await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnavailable(_)));
        assert_eq!(transport.calls_to("/v2/info"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let transport = Arc::new(ScriptedTransport::new().on("POST", "/v2/info", Scripted::Hang));
        let client = client(
            &transport,
            config(&["cdn1.example"]).with_timeout(30).with_max_attempts(2),
        );

        let err = client.fetch(URL).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_secs(30)));
        assert_eq!(transport.calls_to("/v2/info"), 2);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "POST",
            "/v2/info",
            Scripted::json(json!({"status": false, "message": "Video is private"})),
        ));
        let client = client(&transport, config(&["cdn1.example", "cdn2.example"]));

        let err = client.fetch(URL).await.unwrap_err();
        assert_eq!(err, FetchError::Rejected("Video is private".to_string()));
        assert_eq!(transport.calls_to("/v2/info"), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "POST",
            "/v2/info",
            Scripted::json(json!({"status": true, "data": "bm90IGNpcGhlcnRleHQ="})),
        ));
        let client = client(&transport, config(&["cdn1.example", "cdn2.example"]));

        let err = client.fetch(URL).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::DecodeFailed(DecodeError::BadCiphertext(_))
        ));
        assert_eq!(transport.calls_to("/v2/info"), 1);
    }

    #[tokio::test]
    async fn test_empty_pool_discovers_cdn() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("GET", "/random-cdn", Scripted::json(json!({"cdn": "cdn9.example"})))
                .on("POST", "/v2/info", Scripted::json(fixtures::info_envelope())),
        );
        let client = client(&transport, config(&[]));

        assert!(client.fetch(URL).await.is_ok());
        assert_eq!(transport.calls_to("/random-cdn"), 1);
        assert_eq!(transport.hosts_for("/v2/info"), vec!["cdn9.example".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_link_prefers_embedded_url() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(&transport, config(&["cdn1.example"]));
        let meta = fixtures::metadata();
        let embedded = meta
            .renditions()
            .iter()
            .find(|r| r.url.is_some())
            .unwrap();

        let link = client.resolve_link(&meta, embedded).await.unwrap();
        assert_eq!(Some(link), embedded.url.clone());
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_link_requests_download() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "POST",
            "/download",
            Scripted::json(json!({"status": true, "data": {"downloadUrl": "https://dl.example/720.mp4"}})),
        ));
        let client = client(&transport, config(&["cdn1.example"]));
        let meta = fixtures::metadata();
        let hd = meta
            .renditions()
            .iter()
            .find(|r| r.quality == "720p")
            .unwrap();

        let link = client.resolve_link(&meta, hd).await.unwrap();
        assert_eq!(link, "https://dl.example/720.mp4");

        let sent = transport.last_body("/download").unwrap();
        assert_eq!(sent["downloadType"], "video");
        assert_eq!(sent["quality"], "720");
        assert_eq!(sent["key"], fixtures::UPSTREAM_KEY);
    }
}
