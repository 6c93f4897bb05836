//! Media download using yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::adapters::MediaFetcher;
use crate::command::{StageCommand, StageExecutor, StageOutput};
use crate::error::MediaResult;

/// Minimum size for a usable cookies file (bytes).
const MIN_COOKIES_FILE_SIZE: u64 = 50;

/// Default yt-dlp format selector.
pub const DEFAULT_FORMAT: &str = "best";

/// yt-dlp backed [`MediaFetcher`].
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    executor: StageExecutor,
    program: String,
    format: String,
    cookies_path: Option<PathBuf>,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            executor: StageExecutor::new(),
            program: "yt-dlp".to_string(),
            format: DEFAULT_FORMAT.to_string(),
            cookies_path: None,
        }
    }

    /// Override the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the `-f` format selector.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Use a Netscape cookies file when it looks valid.
    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies_path = Some(path.into());
        self
    }

    /// Build the yt-dlp invocation.
    pub fn build_command(&self, url: &str, dest: &Path, cookies: Option<&Path>) -> StageCommand {
        let mut cmd = StageCommand::new(&self.program)
            .arg("--no-playlist")
            .arg("--no-progress")
            .option("-f", &self.format)
            .arg("-o")
            .path_arg(dest);

        if let Some(cookies) = cookies {
            cmd = cmd.arg("--cookies").path_arg(cookies);
        }

        cmd.arg(url)
    }

    async fn usable_cookies(&self) -> Option<&Path> {
        let path = self.cookies_path.as_deref()?;

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.len() >= MIN_COOKIES_FILE_SIZE => {}
            Ok(metadata) => {
                debug!(
                    "Cookies file {} is too small ({} bytes), skipping",
                    path.display(),
                    metadata.len()
                );
                return None;
            }
            Err(e) => {
                debug!("Cookies file {} unavailable: {}", path.display(), e);
                return None;
            }
        }

        match tokio::fs::read_to_string(path).await {
            Ok(content) if is_valid_netscape_cookies(&content) => Some(path),
            Ok(_) => {
                debug!(
                    "Cookies file {} is not in Netscape format, skipping",
                    path.display()
                );
                None
            }
            Err(e) => {
                warn!("Failed to read cookies file: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, timeout: Duration) -> MediaResult<StageOutput> {
        let working_dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let cookies = self.usable_cookies().await;
        let cmd = self.build_command(url, dest, cookies);

        info!(
            "Downloading media from {} to {}",
            url,
            dest.display()
        );

        let output = self.executor.run(&cmd, working_dir, timeout).await?;

        if !output.success && is_rate_limited(&output.stderr) {
            warn!(url = %url, "Source platform rate limit detected");
        }

        Ok(output)
    }
}

/// Check whether yt-dlp output indicates throttling by the platform.
pub fn is_rate_limited(stderr: &str) -> bool {
    stderr.contains("429")
        || stderr.contains("Too Many Requests")
        || stderr.contains("rate limit")
        || stderr.contains("Sign in to confirm")
}

/// Validate that a cookies file appears to be in Netscape format.
///
/// Netscape cookies files either start with "# Netscape HTTP Cookie File"
/// or contain tab-separated lines with at least six fields.
fn is_valid_netscape_cookies(content: &str) -> bool {
    if content.starts_with("# Netscape HTTP Cookie File")
        || content.starts_with("# HTTP Cookie File")
    {
        return true;
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split('\t').count() >= 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let fetcher = YtDlpFetcher::new();
        let cmd = fetcher.build_command(
            "https://platform.example/watch?v=ABCDEFGHIJK",
            Path::new("/work/rec/ABCDEFGHIJK.mp4"),
            None,
        );

        let args = cmd.build_args();
        assert_eq!(cmd.program(), "yt-dlp");
        assert!(args.windows(2).any(|w| w == ["-f", "best"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["-o", "/work/rec/ABCDEFGHIJK.mp4"]));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://platform.example/watch?v=ABCDEFGHIJK")
        );
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_build_command_with_cookies_and_format() {
        let fetcher = YtDlpFetcher::new().with_format("bestaudio");
        let cmd = fetcher.build_command(
            "https://youtu.be/dQw4w9WgXcQ",
            Path::new("out.mp4"),
            Some(Path::new("/secrets/cookies.txt")),
        );

        let args = cmd.build_args();
        assert!(args.windows(2).any(|w| w == ["-f", "bestaudio"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--cookies", "/secrets/cookies.txt"]));
    }

    #[test]
    fn test_netscape_cookie_detection() {
        assert!(is_valid_netscape_cookies("# Netscape HTTP Cookie File\n"));
        assert!(is_valid_netscape_cookies(
            "# comment\n.example.com\tTRUE\t/\tTRUE\t0\tname\tvalue\n"
        ));
        assert!(!is_valid_netscape_cookies("{\"cookies\": []}"));
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("ERROR: HTTP Error 429: Too Many Requests"));
        assert!(is_rate_limited("Sign in to confirm you're not a bot"));
        assert!(!is_rate_limited("ERROR: Video unavailable"));
    }

    #[tokio::test]
    async fn test_fetch_with_missing_tool_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = YtDlpFetcher::new().with_program("vsum-no-such-downloader");

        let err = fetcher
            .fetch(
                "https://platform.example/watch?v=ABCDEFGHIJK",
                &dir.path().join("ABCDEFGHIJK.mp4"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        assert!(err.is_spawn_failure());
    }
}
