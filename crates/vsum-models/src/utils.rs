//! Utility functions for source URL parsing.
//!
//! Media ids are 11-character tokens taken from either the `v=` query
//! parameter or a path segment of the shared-platform URL. The host is not
//! checked, so mirrors and short-link domains work the same way.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Length of an external media id.
pub const MEDIA_ID_LEN: usize = 11;

/// Errors that can occur during media id extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaIdError {
    /// Input is empty after trimming
    #[error("URL is empty")]
    EmptyUrl,
    /// No 11-character token found in the query or path
    #[error("Media id not found in URL")]
    MediaIdNotFound,
}

/// Result type for media id extraction.
pub type MediaIdResult<T> = Result<T, MediaIdError>;

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[?&]v=([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)")
            .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
    })
}

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)")
            .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
    })
}

/// Extract the external media id from a source URL.
///
/// Supported shapes:
/// - `https://host/watch?v=MEDIA_ID`
/// - `https://host/watch?feature=share&v=MEDIA_ID`
/// - `https://short.host/MEDIA_ID`
/// - `https://host/embed/MEDIA_ID`, `/v/MEDIA_ID`, `/shorts/MEDIA_ID`
///
/// The query parameter wins over path segments. Tokens longer than
/// 11 characters are rejected rather than truncated.
pub fn extract_media_id(url: &str) -> MediaIdResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(MediaIdError::EmptyUrl);
    }

    if let Some(caps) = query_pattern().captures(url) {
        return Ok(caps[1].to_string());
    }

    // Skip scheme and host so a host label can never be mistaken for an id.
    let path = match url.find("://") {
        Some(pos) => {
            let rest = &url[pos + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
        }
        None => url,
    };
    let path = path.split(['?', '#']).next().unwrap_or("");

    path_pattern()
        .captures(path)
        .map(|caps| caps[1].to_string())
        .ok_or(MediaIdError::MediaIdNotFound)
}

/// Option-returning variant for callers that treat a missing id as "unknown".
pub fn extract_media_id_opt(url: &str) -> Option<String> {
    extract_media_id(url).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_media_id_success_cases() {
        assert_eq!(
            extract_media_id("https://platform.example/watch?v=ABCDEFGHIJK").unwrap(),
            "ABCDEFGHIJK"
        );

        assert_eq!(
            extract_media_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );

        // Short link
        assert_eq!(
            extract_media_id("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );

        // Embed / shorts
        assert_eq!(
            extract_media_id("https://youtube.com/embed/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_media_id("https://youtube.com/shorts/a-b_c-d_e-f").unwrap(),
            "a-b_c-d_e-f"
        );

        // v= not first in the query
        assert_eq!(
            extract_media_id("https://platform.example/watch?feature=share&v=ABCDEFGHIJK&t=30")
                .unwrap(),
            "ABCDEFGHIJK"
        );

        // Query on a short link is ignored
        assert_eq!(
            extract_media_id("https://youtu.be/dQw4w9WgXcQ?t=30").unwrap(),
            "dQw4w9WgXcQ"
        );

        // Surrounding whitespace
        assert_eq!(
            extract_media_id("  https://platform.example/watch?v=ABCDEFGHIJK  ").unwrap(),
            "ABCDEFGHIJK"
        );
    }

    #[test]
    fn test_extract_media_id_error_cases() {
        assert_eq!(extract_media_id("   "), Err(MediaIdError::EmptyUrl));

        assert_eq!(
            extract_media_id("https://platform.example/watch?v=short"),
            Err(MediaIdError::MediaIdNotFound)
        );

        // Too long
        assert_eq!(
            extract_media_id("https://youtu.be/abc123def456789"),
            Err(MediaIdError::MediaIdNotFound)
        );

        // Host with 11 id-safe characters is not an id
        assert_eq!(
            extract_media_id("https://abcdefghijk/"),
            Err(MediaIdError::MediaIdNotFound)
        );
    }

    #[test]
    fn test_extract_media_id_opt() {
        assert_eq!(
            extract_media_id_opt("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(extract_media_id_opt("not a url"), None);
    }
}
