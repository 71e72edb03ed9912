// Re-hosting trait definition

use async_trait::async_trait;

use super::errors::UploadError;
use super::models::{UploadResult, VideoKey};

/// What the durable channel should know about the uploaded file
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub video_id: VideoKey,
    pub title: String,
    pub quality: String,
    pub duration_secs: u64,
    pub uploader: String,
}

/// Trait for durable re-hosting channels
#[async_trait]
pub trait Rehoster: Send + Sync {
    /// Name of the channel (for logging)
    fn name(&self) -> &'static str;

    /// Largest file the channel accepts
    fn max_upload_bytes(&self) -> u64;

    /// Copy `media_url` into the channel. `size_bytes` is the caller's
    /// estimate and is checked against the ceiling before any transfer.
    async fn upload(
        &self,
        media_url: &str,
        size_bytes: u64,
        context: &UploadContext,
    ) -> Result<UploadResult, UploadError>;
}
