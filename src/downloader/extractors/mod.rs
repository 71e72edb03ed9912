// InfoExtractor module - upstream video info extraction
//
// The only extractor talks to the savetube CDN API:
// - CDN host picked from a shuffled pool, or discovered via `/random-cdn`
// - Encrypted `data` payloads handed to the decoder
// - Transient failures retried on the next host with exponential backoff
//
// Extractors never touch the cache; that is the orchestrator's job.

mod savetube;
mod traits;

pub use savetube::SaveTubeClient;
pub use traits::{ExtractorConfig, InfoExtractor, DEFAULT_API_BASE, DEFAULT_DECRYPTION_KEY};
