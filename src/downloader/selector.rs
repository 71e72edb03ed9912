// VariantSelector - picks one rendition out of decoded metadata
//
// Rules:
// - Exact label match wins ("720p" -> the "720p" rendition)
// - Same height tier next ("hd720", "720", "720p60" all land on the 720 tier)
// - Otherwise the fixed priority order 1080p > 720p > 480p > 360p
// - Audio is "best available": highest bitrate, then largest size
//
// Within one tier the larger size estimate wins, and a rendition in the
// requested container is preferred over one that is not.

use std::cmp::Ordering;

use super::errors::SelectionError;
use super::models::{quality_height, MediaKind, Rendition, VideoMetadata, VIDEO_QUALITY_PRIORITY};

/// Quality values that always mean "give me the best you have"
const AUTO_QUALITIES: [&str; 3] = ["auto", "best", ""];

/// Ordering used to store renditions best-first: video before audio, then
/// tier (or bitrate) descending, then size descending.
pub fn compare_rank(a: &Rendition, b: &Rendition) -> Ordering {
    let kind_order = |k: MediaKind| match k {
        MediaKind::Video => 0,
        MediaKind::Audio => 1,
    };

    kind_order(a.kind)
        .cmp(&kind_order(b.kind))
        .then_with(|| match a.kind {
            MediaKind::Video => b.tier().cmp(&a.tier()),
            MediaKind::Audio => b.audio_bitrate().cmp(&a.audio_bitrate()),
        })
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
}

/// Stateless rendition selector
pub struct VariantSelector;

impl VariantSelector {
    /// Select a rendition of `kind` for the requested quality
    pub fn select<'a>(
        metadata: &'a VideoMetadata,
        kind: MediaKind,
        requested_quality: &str,
    ) -> Result<&'a Rendition, SelectionError> {
        Self::select_with_format(metadata, kind, requested_quality, None)
    }

    /// Same as `select`, preferring `format` among equally good candidates
    pub fn select_with_format<'a>(
        metadata: &'a VideoMetadata,
        kind: MediaKind,
        requested_quality: &str,
        format: Option<&str>,
    ) -> Result<&'a Rendition, SelectionError> {
        let candidates: Vec<&Rendition> = metadata.renditions_of(kind).collect();
        if candidates.is_empty() {
            return Err(SelectionError::NoRenditionAvailable { kind });
        }

        let requested = requested_quality.trim().to_lowercase();

        if !AUTO_QUALITIES.contains(&requested.as_str()) {
            // 1. Exact label
            if let Some(exact) = candidates
                .iter()
                .find(|r| r.quality.to_lowercase() == requested)
            {
                return Ok(exact);
            }

            // 2. Same tier
            if kind == MediaKind::Video {
                if let Some(tier) = Self::requested_tier(&requested) {
                    if let Some(best) = Self::best_in_tier(&candidates, tier, format) {
                        return Ok(best);
                    }
                }
            }
        }

        // 3. Priority fallback
        let fallback = match kind {
            MediaKind::Video => Self::by_priority(&candidates, format),
            MediaKind::Audio => Self::best_audio(&candidates, format),
        };

        fallback.ok_or(SelectionError::NoRenditionAvailable { kind })
    }

    /// Height tier out of "720p", "hd720" or a bare "720"
    fn requested_tier(requested: &str) -> Option<u32> {
        quality_height(requested).or_else(|| requested.parse().ok())
    }

    /// Best rendition of one tier: requested container first, then larger size.
    /// Equal sizes keep the first seen.
    fn best_in_tier<'a>(
        candidates: &[&'a Rendition],
        tier: u32,
        format: Option<&str>,
    ) -> Option<&'a Rendition> {
        let in_tier: Vec<&Rendition> = candidates
            .iter()
            .copied()
            .filter(|r| r.tier() == Some(tier))
            .collect();

        Self::largest(Self::prefer_format(in_tier, format))
    }

    /// Walk the fixed priority list; if none of those tiers exist, take the
    /// highest tier available.
    fn by_priority<'a>(candidates: &[&'a Rendition], format: Option<&str>) -> Option<&'a Rendition> {
        for label in VIDEO_QUALITY_PRIORITY {
            let tier = quality_height(label)?;
            if let Some(best) = Self::best_in_tier(candidates, tier, format) {
                return Some(best);
            }
        }

        let top_tier = candidates.iter().filter_map(|r| r.tier()).max();
        match top_tier {
            Some(tier) => Self::best_in_tier(candidates, tier, format),
            None => Self::largest(Self::prefer_format(candidates.to_vec(), format)),
        }
    }

    /// Highest bitrate audio, then largest size
    fn best_audio<'a>(candidates: &[&'a Rendition], format: Option<&str>) -> Option<&'a Rendition> {
        Self::prefer_format(candidates.to_vec(), format)
            .into_iter()
            .reduce(|best, r| {
                let better = (r.audio_bitrate(), r.size_bytes) > (best.audio_bitrate(), best.size_bytes);
                if better {
                    r
                } else {
                    best
                }
            })
    }

    /// Narrow to the requested container when at least one candidate has it
    fn prefer_format<'a>(candidates: Vec<&'a Rendition>, format: Option<&str>) -> Vec<&'a Rendition> {
        let Some(format) = format.map(str::to_lowercase) else {
            return candidates;
        };
        let matching: Vec<&Rendition> = candidates
            .iter()
            .copied()
            .filter(|r| r.format.to_lowercase() == format)
            .collect();
        if matching.is_empty() {
            candidates
        } else {
            matching
        }
    }

    fn largest<'a>(candidates: Vec<&'a Rendition>) -> Option<&'a Rendition> {
        candidates
            .into_iter()
            .reduce(|best, r| if r.size_bytes > best.size_bytes { r } else { best })
    }
}
