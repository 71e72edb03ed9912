// Telegram re-hosting - copies a resolved media file into a channel
//
// Steps:
// 1. Reject files above the ceiling before touching the network
// 2. Download into a temp file (removed on drop, whatever happens next)
// 3. sendVideo as multipart; the message id gives a stable t.me reference
// 4. Optionally ask getFile for a direct stream URL
//
// Failures are returned as-is; retry policy belongs to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::errors::{TransportError, UploadError};
use super::models::UploadResult;
use super::traits::{Rehoster, UploadContext};
use super::transport::{FilePart, HttpReply, MultipartForm, Transport};
use super::utils::redact_url;

/// Bot API upload ceiling
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub bot_token: String,
    /// Numeric id (`-100...`) or `@public_name`
    pub channel_id: String,
    pub api_base: String,
    pub max_upload_bytes: u64,
    /// Deadline for each transfer (download and upload)
    pub transfer_timeout: Duration,
    /// Deadline for small API calls (getFile)
    pub api_timeout: Duration,
    pub resolve_stream_url: bool,
}

impl UploadConfig {
    pub fn new(bot_token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            channel_id: channel_id.into(),
            api_base: DEFAULT_TELEGRAM_API.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            transfer_timeout: Duration::from_secs(300),
            api_timeout: Duration::from_secs(30),
            resolve_stream_url: true,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_stream_url(mut self, enabled: bool) -> Self {
        self.resolve_stream_url = enabled;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: serde::de::DeserializeOwned")]
struct BotReply<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    #[serde(default)]
    video: Option<SentFile>,
    #[serde(default)]
    document: Option<SentFile>,
}

#[derive(Debug, Deserialize)]
struct SentFile {
    file_id: String,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

pub struct TelegramUploader {
    config: UploadConfig,
    transport: Arc<dyn Transport>,
}

impl TelegramUploader {
    pub fn new(config: UploadConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// `https://t.me/c/<internal id>/<message>` for private channels,
    /// `https://t.me/<name>/<message>` for public ones
    fn reference_url(&self, message_id: i64) -> String {
        let channel = self.config.channel_id.trim();
        match channel.strip_prefix('@') {
            Some(name) => format!("https://t.me/{}/{}", name, message_id),
            None => {
                let internal = channel.strip_prefix("-100").unwrap_or(channel);
                format!("https://t.me/c/{}/{}", internal, message_id)
            }
        }
    }

    fn caption(context: &UploadContext) -> String {
        let minutes = context.duration_secs / 60;
        let seconds = context.duration_secs % 60;
        let uploader = if context.uploader.is_empty() {
            "Unknown"
        } else {
            context.uploader.as_str()
        };
        format!(
            "<b>{title}</b>\n\nVideo ID: <code>{id}</code>\nQuality: {quality}\nDuration: {minutes}:{seconds:02}\nUploader: {uploader}\n\n#{id} #{quality}",
            title = escape_html(&context.title),
            id = context.video_id,
            quality = context.quality,
            uploader = escape_html(uploader),
        )
    }

    async fn fetch_to_temp(
        &self,
        media_url: &str,
        file: &tempfile::NamedTempFile,
    ) -> Result<u64, UploadError> {
        let limit = self.config.max_upload_bytes;
        let download = self.transport.download(media_url, file.path(), limit);
        match tokio::time::timeout(self.config.transfer_timeout, download).await {
            Ok(Ok(written)) => Ok(written),
            // Real size is at least one byte past the limit
            Ok(Err(TransportError::TooLarge { limit })) => Err(UploadError::TooLarge {
                size_bytes: limit.saturating_add(1),
                limit,
            }),
            Ok(Err(TransportError::Io(e))) => Err(UploadError::Storage(e)),
            Ok(Err(e)) => Err(UploadError::NetworkFailure(format!("download: {}", e))),
            Err(_) => Err(UploadError::NetworkFailure(format!(
                "download timed out after {:?}",
                self.config.transfer_timeout
            ))),
        }
    }

    async fn send_video(
        &self,
        file: &tempfile::NamedTempFile,
        context: &UploadContext,
    ) -> Result<SentMessage, UploadError> {
        let form = MultipartForm::default()
            .text("chat_id", self.config.channel_id.clone())
            .text("caption", Self::caption(context))
            .text("parse_mode", "HTML")
            .text("supports_streaming", "true")
            .file(FilePart {
                field: "video".to_string(),
                file_name: format!("[{}]_{}.mp4", context.video_id, context.quality),
                mime: "video/mp4".to_string(),
                path: file.path().to_path_buf(),
            });

        let send_url = self.method_url("sendVideo");
        let upload = self.transport.post_multipart(&send_url, form);
        let reply = match tokio::time::timeout(self.config.transfer_timeout, upload).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(UploadError::NetworkFailure(format!("sendVideo: {}", e))),
            Err(_) => {
                return Err(UploadError::NetworkFailure(format!(
                    "sendVideo timed out after {:?}",
                    self.config.transfer_timeout
                )))
            }
        };

        Self::open_reply(&reply)
    }

    fn open_reply<T: serde::de::DeserializeOwned>(reply: &HttpReply) -> Result<T, UploadError> {
        let parsed: Option<BotReply<T>> = reply.json().ok();
        match parsed {
            Some(BotReply {
                ok: true,
                result: Some(result),
                ..
            }) if reply.is_success() => Ok(result),
            Some(bot) => Err(UploadError::ChannelRejected {
                status: reply.status,
                description: bot
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
            None => Err(UploadError::ChannelRejected {
                status: reply.status,
                description: reply.text_lossy(200),
            }),
        }
    }

    /// Direct file URL via getFile; `None` when unavailable
    async fn stream_url(&self, file_id: &str) -> Option<String> {
        let url = format!("{}?file_id={}", self.method_url("getFile"), file_id);
        let reply = match tokio::time::timeout(self.config.api_timeout, self.transport.get(&url)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "getFile failed");
                return None;
            }
            Err(_) => {
                tracing::warn!("getFile timed out");
                return None;
            }
        };

        match Self::open_reply::<FileInfo>(&reply) {
            Ok(FileInfo {
                file_path: Some(path),
            }) => Some(format!(
                "{}/file/bot{}/{}",
                self.config.api_base.trim_end_matches('/'),
                self.config.bot_token,
                path
            )),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "getFile rejected");
                None
            }
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Rehoster for TelegramUploader {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_upload_bytes(&self) -> u64 {
        self.config.max_upload_bytes
    }

    async fn upload(
        &self,
        media_url: &str,
        size_bytes: u64,
        context: &UploadContext,
    ) -> Result<UploadResult, UploadError> {
        let limit = self.config.max_upload_bytes;
        if size_bytes > limit {
            tracing::info!(video = %context.video_id, size_bytes, limit, "skipping upload above ceiling");
            return Err(UploadError::TooLarge { size_bytes, limit });
        }

        let file = tempfile::Builder::new()
            .prefix("resolver-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        tracing::info!(
            video = %context.video_id,
            quality = %context.quality,
            source = %redact_url(media_url, 80),
            "starting re-host"
        );
        let written = self.fetch_to_temp(media_url, &file).await?;
        let message = self.send_video(&file, context).await?;

        let sent = message
            .video
            .or(message.document)
            .ok_or_else(|| UploadError::ChannelRejected {
                status: 200,
                description: "reply carries no file".to_string(),
            })?;

        let stream_url = if self.config.resolve_stream_url {
            self.stream_url(&sent.file_id).await
        } else {
            None
        };

        let result = UploadResult {
            reference_url: self.reference_url(message.message_id),
            stream_url,
            file_id: sent.file_id,
            size_bytes: sent.file_size.unwrap_or(written),
        };
        tracing::info!(video = %context.video_id, reference = %result.reference_url, "re-host stored");
        Ok(result)
    }
}
