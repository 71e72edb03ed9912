// Common data models for the resolver

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use url::Url;

use super::errors::{DownloadError, FetchError};
use super::selector::compare_rank;

/// Video quality tiers from best to worst
pub const VIDEO_QUALITY_PRIORITY: [&str; 4] = ["1080p", "720p", "480p", "360p"];

/// Fallback audio bitrate when the upstream does not report one
const DEFAULT_AUDIO_KBPS: u64 = 128;

lazy_static::lazy_static! {
    static ref VIDEO_ID_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/v/([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/watch\?.*?v=([a-zA-Z0-9_-]{11})").unwrap(),
    ];
    static ref HEIGHT_RE: Regex = Regex::new(r"(\d{3,4})p").unwrap();
    static ref BITRATE_RE: Regex = Regex::new(r"(\d{2,3})\s*kbps").unwrap();
}

/// Canonical video identifier derived from a source URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoKey(String);

impl VideoKey {
    /// Normalize a YouTube URL into its 11-character video id
    pub fn from_url(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        let parsed =
            Url::parse(trimmed).map_err(|_| FetchError::InvalidUrl(trimmed.to_string()))?;

        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let known_host = matches!(
            host.as_str(),
            "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be"
        );
        if !known_host || !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(trimmed.to_string()));
        }

        VIDEO_ID_PATTERNS
            .iter()
            .find_map(|re| re.captures(trimmed))
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| FetchError::InvalidUrl(trimmed.to_string()))
    }

    /// Accept a bare id as reported by the upstream document
    pub fn from_id(id: &str) -> Option<Self> {
        let valid = id.len() == 11
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL sent to the upstream, independent of the shape the caller used
    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media kind of a rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Container used when the caller does not ask for one
    pub fn default_format(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            other => Err(DownloadError::InvalidInput(format!(
                "unknown media kind: {}",
                other
            ))),
        }
    }
}

/// One concrete downloadable variant of a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub kind: MediaKind,
    /// Quality label (e.g. "1080p", "128kbps")
    pub quality: String,
    /// Container (mp4, webm, mp3, m4a)
    pub format: String,
    /// Direct media URL when the upstream embeds one
    pub url: Option<String>,
    /// Size estimate in bytes
    pub size_bytes: Option<u64>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

impl Rendition {
    /// Height tier (1080, 720, ...) from the explicit height or the label
    pub fn tier(&self) -> Option<u32> {
        self.height.or_else(|| quality_height(&self.quality))
    }

    /// Audio bitrate from the explicit field or the label
    pub fn audio_bitrate(&self) -> Option<u32> {
        self.bitrate_kbps.or_else(|| {
            BITRATE_RE
                .captures(&self.quality.to_lowercase())
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
    }

    /// Quality value the upstream expects when asked for a link ("720", "128")
    pub fn upstream_quality(&self) -> String {
        match self.kind {
            MediaKind::Video => self
                .tier()
                .map(|h| h.to_string())
                .unwrap_or_else(|| self.quality.trim_end_matches('p').to_string()),
            MediaKind::Audio => self
                .audio_bitrate()
                .map(|b| b.to_string())
                .unwrap_or_else(|| DEFAULT_AUDIO_KBPS.to_string()),
        }
    }
}

/// Parse a height tier out of a label like "720p", "720p60" or "hd720"
pub fn quality_height(label: &str) -> Option<u32> {
    let lower = label.to_lowercase();
    if let Some(h) = HEIGHT_RE
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(h);
    }
    lower
        .strip_prefix("hd")
        .and_then(|rest| rest.parse().ok())
}

/// Rough size estimate from the bitrate table and duration
pub fn estimate_size(rendition: &Rendition, duration_secs: u64) -> Option<u64> {
    if duration_secs == 0 {
        return None;
    }
    let kbps = match rendition.kind {
        MediaKind::Video => match rendition.tier() {
            Some(360) => 1000,
            Some(480) => 2500,
            Some(720) => 5000,
            Some(1080) => 8000,
            _ => 2500,
        },
        MediaKind::Audio => rendition
            .audio_bitrate()
            .map(u64::from)
            .unwrap_or(DEFAULT_AUDIO_KBPS),
    };
    Some((kbps * 1000 / 8).saturating_mul(duration_secs))
}

/// Decoded video information with its renditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: VideoKey,
    /// Opaque upstream handle used to request download links
    pub upstream_key: String,
    pub title: String,
    pub duration_secs: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub view_count: u64,
    renditions: Vec<Rendition>,
}

impl VideoMetadata {
    pub fn new(
        video_id: VideoKey,
        upstream_key: impl Into<String>,
        title: impl Into<String>,
        duration_secs: u64,
    ) -> Self {
        Self {
            video_id,
            upstream_key: upstream_key.into(),
            title: title.into(),
            duration_secs,
            thumbnail: String::new(),
            uploader: String::new(),
            view_count: 0,
            renditions: Vec::new(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = thumbnail.into();
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }

    pub fn with_view_count(mut self, views: u64) -> Self {
        self.view_count = views;
        self
    }

    /// Attach renditions, dropping duplicates (same kind + quality) after the first.
    /// The stored order is best-first per kind.
    pub fn with_renditions(mut self, renditions: impl IntoIterator<Item = Rendition>) -> Self {
        let mut seen = HashSet::new();
        let duration = self.duration_secs;
        let mut kept: Vec<Rendition> = renditions
            .into_iter()
            .filter(|r| seen.insert((r.kind, r.quality.to_lowercase())))
            .map(|mut r| {
                if r.size_bytes.is_none() {
                    r.size_bytes = estimate_size(&r, duration);
                }
                r
            })
            .collect();
        kept.sort_by(compare_rank);
        self.renditions = kept;
        self
    }

    pub fn renditions(&self) -> &[Rendition] {
        &self.renditions
    }

    pub fn renditions_of(&self, kind: MediaKind) -> impl Iterator<Item = &Rendition> {
        self.renditions.iter().filter(move |r| r.kind == kind)
    }
}

/// Progress of durable re-hosting attached to a download result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RehostStatus {
    NotRequested,
    Pending,
    Stored,
    Failed { reason: String },
}

/// Resolved download produced by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub video_id: VideoKey,
    pub source_url: String,
    pub title: String,
    pub rendition: Rendition,
    /// Container the caller asked for
    pub format: String,
    pub direct_url: String,
    pub masked_url: Option<String>,
    pub durable_url: Option<String>,
    pub rehost: RehostStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub resolved_at: OffsetDateTime,
}

/// Outcome of a durable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Stable reference to the stored message
    pub reference_url: String,
    /// Direct stream URL of the stored file, when the channel exposes one
    pub stream_url: Option<String>,
    pub file_id: String,
    pub size_bytes: u64,
}
