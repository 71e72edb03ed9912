// Error types for the resolve pipeline
//
// Every component owns a narrow error enum; `DownloadError` is the single type
// returned to callers of the orchestrator. It is `Clone` because one upstream
// outcome is handed to every waiter of an in-flight request.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::models::MediaKind;

/// Failures of the payload decoder. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Base64, block length or padding is invalid
    #[error("bad ciphertext: {0}")]
    BadCiphertext(String),

    /// Plaintext is not a usable document (not JSON, or required fields missing)
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Pre-shared key has the wrong length
    #[error("invalid key length: expected 16 bytes, got {0}")]
    InvalidKey(usize),
}

/// Failures of the variant selector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no {kind} rendition available")]
    NoRenditionAvailable { kind: MediaKind },
}

/// Low level HTTP failures reported by a `Transport`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Connect(e.to_string())
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failures of the extraction client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// URL does not point at a recognizable video
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Upstream returned a non-success status, an empty body or could not be reached
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream call exceeded its deadline
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered but explicitly refused the request
    #[error("upstream rejected the request: {0}")]
    Rejected(String),

    /// Payload could not be decrypted or parsed
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),
}

impl FetchError {
    /// Transient failures worth another attempt on a different endpoint
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::Timeout(_))
    }
}

/// Failures of the re-hosting uploader. Reported upward, never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("file of {size_bytes} bytes exceeds the {limit} byte upload ceiling")]
    TooLarge { size_bytes: u64, limit: u64 },

    #[error("network failure during upload: {0}")]
    NetworkFailure(String),

    #[error("channel rejected the upload (status {status}): {description}")]
    ChannelRejected { status: u16, description: String },

    #[error("transient storage unavailable: {0}")]
    Storage(String),
}

/// Failures of a durable key/value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("durable record is corrupt: {0}")]
    Corrupt(String),

    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration problems detected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("decryption key must be 32 hex characters (16 bytes)")]
    InvalidKey,

    #[error("{0}")]
    Inconsistent(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Error kinds exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UpstreamUnavailable,
    Timeout,
    DecodeFailed,
    UpstreamRejected,
    NoRenditionAvailable,
}

/// Error returned by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Bad quality/format/kind in the request
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Fetch(FetchError::InvalidUrl(_)) => ErrorKind::InvalidInput,
            Self::Fetch(FetchError::UpstreamUnavailable(_)) => ErrorKind::UpstreamUnavailable,
            Self::Fetch(FetchError::Timeout(_)) => ErrorKind::Timeout,
            Self::Fetch(FetchError::Rejected(_)) => ErrorKind::UpstreamRejected,
            Self::Fetch(FetchError::DecodeFailed(_)) => ErrorKind::DecodeFailed,
            Self::Selection(_) => ErrorKind::NoRenditionAvailable,
        }
    }

    /// Whether a fresh `resolve` call might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::UpstreamUnavailable | ErrorKind::Timeout)
    }

    /// Structured failure for the request-handling layer
    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            reason: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Serializable failure description
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub reason: String,
    pub retryable: bool,
}
