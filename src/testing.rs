// Test doubles shared by the unit tests
//
// ScriptedTransport  - canned HTTP replies matched by method + URL fragment
// MemoryStore        - in-memory DurableStore with failure/latency switches
// CountingExtractor  - InfoExtractor over fixture metadata, counting calls
// RecordingRehoster  - Rehoster that records uploads instead of sending them

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::downloader::cache::DurableStore;
use crate::downloader::errors::{FetchError, StoreError, TransportError, UploadError};
use crate::downloader::extractors::InfoExtractor;
use crate::downloader::models::{Rendition, UploadResult, VideoMetadata};
use crate::downloader::traits::{Rehoster, UploadContext};
use crate::downloader::transport::{HttpReply, MultipartForm, Transport};

/// One canned reaction of the scripted transport
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply { status: u16, body: Vec<u8> },
    /// Raw body; for `download` these are the file contents
    Bytes(Vec<u8>),
    Fail(TransportError),
    /// Never answers
    Hang,
}

impl Scripted {
    pub fn json(value: Value) -> Self {
        Self::json_status(200, value)
    }

    pub fn json_status(status: u16, value: Value) -> Self {
        Self::Reply {
            status,
            body: value.to_string().into_bytes(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Reply {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

struct Rule {
    method: &'static str,
    fragment: String,
    replies: Mutex<VecDeque<Scripted>>,
}

impl Rule {
    /// Pop the next reply; the last one repeats forever
    fn next(&self) -> Scripted {
        let mut replies = self.replies.lock();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }
}

#[derive(Debug, Clone)]
struct Call {
    method: &'static str,
    url: String,
    body: Option<Value>,
    form: Option<MultipartForm>,
}

/// Transport answering from a script and recording every call
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` calls whose URL contains `fragment`.
    /// Methods: GET, POST, DOWNLOAD, MULTIPART.
    pub fn on(self, method: &'static str, fragment: &str, reply: Scripted) -> Self {
        self.on_sequence(method, fragment, vec![reply])
    }

    pub fn on_sequence(mut self, method: &'static str, fragment: &str, replies: Vec<Scripted>) -> Self {
        assert!(!replies.is_empty(), "a rule needs at least one reply");
        self.rules.push(Rule {
            method,
            fragment: fragment.to_string(),
            replies: Mutex::new(replies.into()),
        });
        self
    }

    pub fn calls_to(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.contains(fragment))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_body(&self, fragment: &str) -> Option<Value> {
        self.last_call(fragment).and_then(|c| c.body)
    }

    pub fn last_form(&self, fragment: &str) -> Option<MultipartForm> {
        self.last_call(fragment).and_then(|c| c.form)
    }

    /// Hosts contacted for `fragment`, in call order
    pub fn hosts_for(&self, fragment: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.contains(fragment))
            .filter_map(|c| url::Url::parse(&c.url).ok())
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect()
    }

    fn last_call(&self, fragment: &str) -> Option<Call> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.url.contains(fragment))
            .cloned()
    }

    async fn react(&self, call: Call) -> Result<Scripted, TransportError> {
        let method = call.method;
        let url = call.url.clone();
        self.calls.lock().push(call);

        let rule = self
            .rules
            .iter()
            .find(|r| r.method == method && url.contains(&r.fragment))
            .ok_or_else(|| TransportError::Connect(format!("no script for {} {}", method, url)))?;

        match rule.next() {
            Scripted::Fail(e) => Err(e),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Timeout)
            }
            other => Ok(other),
        }
    }

    async fn reply(&self, call: Call) -> Result<HttpReply, TransportError> {
        match self.react(call).await? {
            Scripted::Reply { status, body } => Ok(HttpReply::new(status, body)),
            Scripted::Bytes(body) => Ok(HttpReply::new(200, body)),
            Scripted::Fail(e) => Err(e),
            Scripted::Hang => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        self.reply(Call {
            method: "GET",
            url: url.to_string(),
            body: None,
            form: None,
        })
        .await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply, TransportError> {
        self.reply(Call {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
            form: None,
        })
        .await
    }

    async fn download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<u64, TransportError> {
        let call = Call {
            method: "DOWNLOAD",
            url: url.to_string(),
            body: None,
            form: None,
        };
        let bytes = match self.react(call).await? {
            Scripted::Bytes(bytes) => bytes,
            Scripted::Reply { status, body } if (200..300).contains(&status) => body,
            Scripted::Reply { status, .. } => return Err(TransportError::Status(status)),
            Scripted::Fail(e) => return Err(e),
            Scripted::Hang => return Err(TransportError::Timeout),
        };
        if bytes.len() as u64 > max_bytes {
            return Err(TransportError::TooLarge { limit: max_bytes });
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn post_multipart(&self, url: &str, form: MultipartForm) -> Result<HttpReply, TransportError> {
        self.reply(Call {
            method: "MULTIPART",
            url: url.to_string(),
            body: None,
            form: Some(form),
        })
        .await
    }
}

/// Upstream documents and the metadata they decode to
pub mod fixtures {
    use serde_json::{json, Value};

    use crate::downloader::decoder;
    use crate::downloader::extractors::DEFAULT_DECRYPTION_KEY;
    use crate::downloader::models::{MediaKind, VideoMetadata};

    pub const VIDEO_ID: &str = "Qrhl4uxAeu8";
    pub const TITLE: &str = "Rick Astley - Never Gonna Give You Up";
    pub const UPSTREAM_KEY: &str = "c2F2ZXR1YmUta2V5LVFyaGw0dXhBZXU4";

    const IV: [u8; 16] = [7; 16];

    fn key() -> Vec<u8> {
        hex::decode(DEFAULT_DECRYPTION_KEY).unwrap()
    }

    /// Plaintext info document: 1080p carries its own URL, 720p and 360p
    /// need a link request, plus one 128 kbps audio track.
    pub fn document() -> Value {
        json!({
            "id": VIDEO_ID,
            "key": UPSTREAM_KEY,
            "title": TITLE,
            "duration": 212,
            "thumbnail": "https://i.ytimg.com/vi/Qrhl4uxAeu8/hqdefault.jpg",
            "uploader": "Rick Astley",
            "viewCount": 1_500_000_000u64,
            "video_formats": [
                {"label": "1080p", "height": 1080, "format": "mp4", "url": "https://cdn.example/1080.mp4"},
                {"label": "720p", "height": 720, "format": "mp4"},
                {"label": "360p", "height": 360, "format": "mp4"}
            ],
            "audio_formats": [
                {"quality": 128, "format": "mp3"}
            ]
        })
    }

    pub fn sealed_payload() -> String {
        decoder::seal(document().to_string().as_bytes(), &key(), &IV).unwrap()
    }

    /// `/v2/info` reply carrying the sealed document
    pub fn info_envelope() -> Value {
        json!({"status": true, "data": sealed_payload()})
    }

    pub fn metadata() -> VideoMetadata {
        decoder::decode(sealed_payload().as_bytes(), &key()).unwrap()
    }

    /// Same video without any audio track
    pub fn video_only_metadata() -> VideoMetadata {
        let full = metadata();
        let videos: Vec<_> = full.renditions_of(MediaKind::Video).cloned().collect();
        VideoMetadata::new(
            full.video_id.clone(),
            full.upstream_key.clone(),
            full.title.clone(),
            full.duration_secs,
        )
        .with_renditions(videos)
    }
}

/// In-memory durable tier
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    failing: bool,
    delay: Option<Duration>,
    get_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Every operation sleeps `delay` first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.enter().await?;
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.enter().await?;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        self.enter().await?;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.enter().await?;
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

/// Extractor serving fixture metadata
pub struct CountingExtractor {
    metadata: VideoMetadata,
    delay: Option<Duration>,
    failure: Option<FetchError>,
    fetches: AtomicUsize,
    links: AtomicUsize,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self {
            metadata: fixtures::metadata(),
            delay: None,
            failure: None,
            fetches: AtomicUsize::new(0),
            links: AtomicUsize::new(0),
        }
    }

    pub fn with_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Each fetch takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each fetch fails with `error`
    pub fn failing_with(mut self, error: FetchError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InfoExtractor for CountingExtractor {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn fetch(&self, _url: &str) -> Result<VideoMetadata, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.metadata.clone()),
        }
    }

    async fn resolve_link(
        &self,
        _metadata: &VideoMetadata,
        rendition: &Rendition,
    ) -> Result<String, FetchError> {
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(rendition.url.clone().unwrap_or_else(|| {
            format!("https://dl.example/{}.{}", rendition.quality, rendition.format)
        }))
    }
}

/// Rehoster that records uploads
pub struct RecordingRehoster {
    failure: Option<UploadError>,
    ceiling: u64,
    uploads: AtomicUsize,
    last: Mutex<Option<UploadResult>>,
}

impl RecordingRehoster {
    pub fn new() -> Self {
        Self {
            failure: None,
            ceiling: 1024 * 1024 * 1024,
            uploads: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn failing(error: UploadError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    /// Largest accepted file
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn last_result(&self) -> Option<UploadResult> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl Rehoster for RecordingRehoster {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn max_upload_bytes(&self) -> u64 {
        self.ceiling
    }

    async fn upload(
        &self,
        _media_url: &str,
        size_bytes: u64,
        context: &UploadContext,
    ) -> Result<UploadResult, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        let result = UploadResult {
            reference_url: format!("https://t.me/c/1/{}", context.quality),
            stream_url: None,
            file_id: format!("FILE-{}", context.video_id),
            size_bytes,
        };
        *self.last.lock() = Some(result.clone());
        Ok(result)
    }
}
