// Helper functions shared by the client, uploader and masking registry

use std::time::Duration;

use super::errors::ConfigError;

/// Build the shared HTTP client with optional proxy (http, https, socks5h)
pub fn build_http_client(
    proxy: Option<&str>,
    connect_timeout: Duration,
) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("youtube-resolver/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|_| ConfigError::InvalidValue {
            name: "RESOLVER_PROXY".to_string(),
            value: proxy_url.to_string(),
        })?;
        tracing::info!(proxy = proxy_url, "using upstream proxy");
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

/// Exponential backoff: base * 2^(attempt - 1), capped at `max`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(max)
}

/// Make a title usable as a file name: keep letters, digits, spaces, dash, underscore, dot
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    let truncated: String = trimmed.chars().take(max_len).collect();
    let result = truncated.trim().replace(' ', "_");
    if result.is_empty() {
        "video".to_string()
    } else {
        result
    }
}

/// Shorten a URL for logs (drops query and anything past `max` chars)
pub fn redact_url(url: &str, max: usize) -> String {
    let base = url.split('?').next().unwrap_or(url);
    if base.chars().count() > max {
        format!("{}...", base.chars().take(max).collect::<String>())
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, base, max), max);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Video: Part 1/2", 64), "My_Video__Part_1_2");
        assert_eq!(sanitize_filename("???", 64), "___");
        assert_eq!(sanitize_filename("   ", 64), "video");
        assert_eq!(sanitize_filename("abcdefgh", 3), "abc");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://cdn.example/v.mp4?token=secret", 100),
            "https://cdn.example/v.mp4"
        );
        assert_eq!(redact_url("https://cdn.example/long", 11), "https://cdn...");
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let err = build_http_client(Some("http://[invalid"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
