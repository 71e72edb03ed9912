// Downloader module - resolve pipeline from source URL to download link
//
// decoder -> selector -> extractors (upstream client) -> cache -> orchestrator
// uploader and masking hang off the orchestrator as optional stages.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod extractors;
pub mod flight;
pub mod masking;
pub mod models;
pub mod orchestrator;
pub mod selector;
pub mod stats;
pub mod traits;
pub mod transport;
pub mod uploader;
pub mod utils;

pub use config::ResolverConfig;
pub use errors::{DownloadError, ErrorKind, FailureReport};
pub use models::{DownloadResult, MediaKind, Rendition, VideoKey, VideoMetadata};
pub use orchestrator::{Downloader, ResolveOutcome, ResolveRequest};
pub use selector::VariantSelector;
