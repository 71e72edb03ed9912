pub mod downloader;

#[cfg(test)]
pub(crate) mod testing;

pub use downloader::{
    Downloader, DownloadError, DownloadResult, MediaKind, ResolveOutcome, ResolveRequest,
    ResolverConfig, VideoMetadata,
};
