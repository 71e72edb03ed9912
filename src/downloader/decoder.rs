// Payload decoder - turns the upstream's encrypted `data` field into VideoMetadata
//
// Wire layout: base64( IV[16] || AES-128-CBC(PKCS#7(json)) )
// The key is a pre-shared 16-byte secret. Pure functions, no I/O.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use super::errors::DecodeError;
use super::models::{MediaKind, Rendition, VideoKey, VideoMetadata};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Plaintext document as produced by the upstream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadDocument {
    #[serde(default)]
    id: Option<String>,
    key: Option<String>,
    title: Option<String>,
    #[serde(default)]
    duration: Option<Value>,
    #[serde(default)]
    duration_label: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    view_count: Option<Value>,
    #[serde(default, rename = "video_formats")]
    video_formats: Vec<PayloadFormat>,
    #[serde(default, rename = "audio_formats")]
    audio_formats: Vec<PayloadFormat>,
}

#[derive(Debug, Deserialize)]
struct PayloadFormat {
    #[serde(default)]
    label: Option<String>,
    /// Either a number (720, 128) or a label ("720p")
    #[serde(default)]
    quality: Option<Value>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default, alias = "ext")]
    format: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "filesize")]
    size: Option<u64>,
}

/// Decrypt and parse a payload. The document must carry its own video id.
pub fn decode(encrypted_payload: &[u8], key: &[u8]) -> Result<VideoMetadata, DecodeError> {
    let doc = open_document(encrypted_payload, key)?;
    let id = doc
        .id
        .as_deref()
        .and_then(VideoKey::from_id)
        .ok_or_else(|| DecodeError::MalformedDocument("missing or invalid id".to_string()))?;
    build_metadata(doc, id)
}

/// Decrypt and parse a payload fetched for `expected`.
///
/// A document without an id is attributed to `expected`; a document naming a
/// different video is rejected.
pub fn decode_for(
    encrypted_payload: &[u8],
    key: &[u8],
    expected: &VideoKey,
) -> Result<VideoMetadata, DecodeError> {
    let doc = open_document(encrypted_payload, key)?;
    if let Some(id) = doc.id.as_deref() {
        if id != expected.as_str() {
            return Err(DecodeError::MalformedDocument(format!(
                "document id {} does not match requested {}",
                id, expected
            )));
        }
    }
    build_metadata(doc, expected.clone())
}

/// Encrypt a plaintext document into the upstream wire format.
/// Inverse of `decode`; used for fixtures.
pub fn seal(plaintext: &[u8], key: &[u8], iv: &[u8; IV_LEN]) -> Result<String, DecodeError> {
    check_key(key)?;
    let ciphertext = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|_| DecodeError::InvalidKey(key.len()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut wire = Vec::with_capacity(IV_LEN + ciphertext.len());
    wire.extend_from_slice(iv);
    wire.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(wire))
}

fn check_key(key: &[u8]) -> Result<(), DecodeError> {
    if key.len() != KEY_LEN {
        return Err(DecodeError::InvalidKey(key.len()));
    }
    Ok(())
}

/// base64 -> split IV -> decrypt -> unpad -> JSON
fn open_document(encrypted_payload: &[u8], key: &[u8]) -> Result<PayloadDocument, DecodeError> {
    check_key(key)?;

    let compact: Vec<u8> = encrypted_payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = STANDARD
        .decode(&compact)
        .map_err(|e| DecodeError::BadCiphertext(format!("base64: {}", e)))?;

    if raw.len() < IV_LEN + BLOCK_LEN {
        return Err(DecodeError::BadCiphertext(format!(
            "payload too short: {} bytes",
            raw.len()
        )));
    }
    let (iv, ciphertext) = raw.split_at(IV_LEN);
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(DecodeError::BadCiphertext(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }

    let plaintext = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| DecodeError::InvalidKey(key.len()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DecodeError::BadCiphertext("invalid padding".to_string()))?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| DecodeError::MalformedDocument("plaintext is not UTF-8".to_string()))?;

    serde_json::from_str(&text).map_err(|e| DecodeError::MalformedDocument(e.to_string()))
}

fn build_metadata(doc: PayloadDocument, id: VideoKey) -> Result<VideoMetadata, DecodeError> {
    let title = doc
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DecodeError::MalformedDocument("missing title".to_string()))?;
    let upstream_key = doc
        .key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| DecodeError::MalformedDocument("missing key".to_string()))?;

    let duration_secs = doc
        .duration
        .as_ref()
        .and_then(value_as_secs)
        .or_else(|| doc.duration_label.as_deref().and_then(parse_duration_label))
        .unwrap_or(0);

    let renditions: Vec<Rendition> = doc
        .video_formats
        .into_iter()
        .filter_map(|f| to_rendition(f, MediaKind::Video))
        .chain(
            doc.audio_formats
                .into_iter()
                .filter_map(|f| to_rendition(f, MediaKind::Audio)),
        )
        .collect();

    Ok(VideoMetadata::new(id, upstream_key, title, duration_secs)
        .with_thumbnail(doc.thumbnail.unwrap_or_default())
        .with_uploader(doc.uploader.unwrap_or_default())
        .with_view_count(doc.view_count.as_ref().and_then(value_as_u64).unwrap_or(0))
        .with_renditions(renditions))
}

fn to_rendition(format: PayloadFormat, kind: MediaKind) -> Option<Rendition> {
    let quality = match (&format.label, &format.quality) {
        (Some(label), _) if !label.trim().is_empty() => label.trim().to_string(),
        (_, Some(Value::String(s))) if !s.trim().is_empty() => s.trim().to_string(),
        (_, Some(Value::Number(n))) => match kind {
            MediaKind::Video => format!("{}p", n),
            MediaKind::Audio => format!("{}kbps", n),
        },
        _ => return None,
    };

    let bitrate_kbps = match (kind, &format.quality) {
        (MediaKind::Audio, Some(Value::Number(n))) => n.as_u64().and_then(|b| u32::try_from(b).ok()),
        _ => None,
    };

    Some(Rendition {
        kind,
        quality,
        format: format
            .format
            .map(|f| f.to_lowercase())
            .unwrap_or_else(|| kind.default_format().to_string()),
        url: format.url.filter(|u| !u.is_empty()),
        size_bytes: format.size.filter(|s| *s > 0),
        height: format.height,
        bitrate_kbps,
    })
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_secs(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) if s.contains(':') => parse_duration_label(s),
        other => value_as_u64(other),
    }
}

/// "MM:SS" or "HH:MM:SS" to seconds
fn parse_duration_label(label: &str) -> Option<u64> {
    let parts: Vec<u64> = label
        .trim()
        .split(':')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: [u8; 16] = [
        0xC5, 0xD5, 0x8E, 0xF6, 0x7A, 0x75, 0x84, 0xE4, 0xA2, 0x9F, 0x6C, 0x35, 0xBB, 0xC4, 0xEB,
        0x12,
    ];
    const IV: [u8; 16] = *b"0123456789abcdef";

    fn document() -> Value {
        json!({
            "id": "Qrhl4uxAeu8",
            "key": "upstream-key-1",
            "title": "Sample clip",
            "durationLabel": "3:32",
            "thumbnail": "https://i.ytimg.com/vi/Qrhl4uxAeu8/hq.jpg",
            "uploader": "someone",
            "viewCount": 1234,
            "video_formats": [
                {"label": "360p", "quality": 360, "format": "mp4", "size": 10_000_000},
                {"label": "720p", "quality": 720, "format": "mp4", "url": "https://cdn.example/720.mp4"},
                {"quality": 1080, "ext": "mp4", "filesize": 90_000_000}
            ],
            "audio_formats": [
                {"quality": 128, "format": "mp3"}
            ]
        })
    }

    fn sealed(doc: &Value) -> String {
        seal(doc.to_string().as_bytes(), &KEY, &IV).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let payload = sealed(&document());
        let meta = decode(payload.as_bytes(), &KEY).unwrap();

        assert_eq!(meta.video_id.as_str(), "Qrhl4uxAeu8");
        assert_eq!(meta.upstream_key, "upstream-key-1");
        assert_eq!(meta.title, "Sample clip");
        assert_eq!(meta.duration_secs, 212);
        assert_eq!(meta.view_count, 1234);

        let labels: Vec<&str> = meta.renditions().iter().map(|r| r.quality.as_str()).collect();
        assert_eq!(labels, vec!["1080p", "720p", "360p", "128kbps"]);

        let hd = &meta.renditions()[1];
        assert_eq!(hd.url.as_deref(), Some("https://cdn.example/720.mp4"));
        // Missing size is estimated: 5000 kbps over 212 s
        assert_eq!(hd.size_bytes, Some(5000 * 1000 / 8 * 212));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let payload = sealed(&document());
        let mut raw = STANDARD.decode(payload.as_bytes()).unwrap();
        // Flip the final block; the IV is left intact
        let len = raw.len();
        for b in &mut raw[len - 16..] {
            *b ^= 0xFF;
        }
        let tampered = STANDARD.encode(raw);

        let err = decode(tampered.as_bytes(), &KEY).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadCiphertext(_) | DecodeError::MalformedDocument(_)
        ));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let payload = sealed(&document());
        let mut raw = STANDARD.decode(payload.as_bytes()).unwrap();
        raw.truncate(raw.len() - 3);
        let err = decode(STANDARD.encode(raw).as_bytes(), &KEY).unwrap_err();
        assert!(matches!(err, DecodeError::BadCiphertext(_)));
    }

    #[test]
    fn test_not_base64() {
        let err = decode(b"%%%not base64%%%", &KEY).unwrap_err();
        assert!(matches!(err, DecodeError::BadCiphertext(_)));
    }

    #[test]
    fn test_wrong_key_length() {
        let payload = sealed(&document());
        let err = decode(payload.as_bytes(), &KEY[..8]).unwrap_err();
        assert_eq!(err, DecodeError::InvalidKey(8));
    }

    #[test]
    fn test_missing_title_is_malformed() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("title");
        let err = decode(sealed(&doc).as_bytes(), &KEY).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedDocument(_)));
    }

    #[test]
    fn test_plaintext_not_json() {
        let payload = seal(b"definitely not json", &KEY, &IV).unwrap();
        let err = decode(payload.as_bytes(), &KEY).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedDocument(_)));
    }

    #[test]
    fn test_decode_for_attributes_and_checks_id() {
        let expected = VideoKey::from_id("Qrhl4uxAeu8").unwrap();

        let mut doc = document();
        doc.as_object_mut().unwrap().remove("id");
        let meta = decode_for(sealed(&doc).as_bytes(), &KEY, &expected).unwrap();
        assert_eq!(meta.video_id, expected);

        let other = VideoKey::from_id("dQw4w9WgXcQ").unwrap();
        let err = decode_for(sealed(&document()).as_bytes(), &KEY, &other).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedDocument(_)));
    }

    #[test]
    fn test_whitespace_in_payload_tolerated() {
        let payload = sealed(&document());
        let wrapped: String = payload
            .as_bytes()
            .chunks(20)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(decode(wrapped.as_bytes(), &KEY).is_ok());
    }

    #[test]
    fn test_duration_label_shapes() {
        assert_eq!(parse_duration_label("3:32"), Some(212));
        assert_eq!(parse_duration_label("1:00:05"), Some(3605));
        assert_eq!(parse_duration_label("abc"), None);
        assert_eq!(parse_duration_label("99999999999999999:00:00"), None);
    }

    #[test]
    fn test_huge_duration_does_not_overflow() {
        let mut doc = document();
        doc["duration"] = json!(u64::MAX);
        let meta = decode(sealed(&doc).as_bytes(), &KEY).unwrap();
        assert_eq!(meta.duration_secs, u64::MAX);
        assert!(meta.renditions().iter().all(|r| r.size_bytes.is_some()));

        let mut doc = document();
        doc["durationLabel"] = json!("99999999999999999:00:00");
        let meta = decode(sealed(&doc).as_bytes(), &KEY).unwrap();
        assert_eq!(meta.duration_secs, 0);
    }
}
