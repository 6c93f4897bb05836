//! Source page metadata scraping.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};
use vsum_models::VideoDetails;

use crate::adapters::DetailsFetcher;
use crate::error::{MediaError, MediaResult};

/// Suffix the platform appends to page titles.
const TITLE_SUFFIX: &str = " - YouTube";

/// Default request timeout for the page fetch.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

struct Patterns {
    title: Regex,
    author: Regex,
    description: Regex,
    genre: Regex,
    published: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| {
            Regex::new(p).unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
        };
        Patterns {
            title: re(r#"<meta itemprop="name" content="(.*?)">"#),
            author: re(
                r#"(?s)<span itemprop="author".*?>\s*<link itemprop="url" href="(.*?)">\s*<link itemprop="name" content="(.*?)">"#,
            ),
            description: re(r#"(?s)<meta property="og:description" content="(.*?)">"#),
            genre: re(r#"(?s)<meta itemprop="genre" content="(.*?)">"#),
            published: re(r#"(?s)<meta itemprop="datePublished" content="(.*?)">"#),
        }
    })
}

/// Fetches a source page over HTTP and scrapes its embedded metadata.
#[derive(Debug, Clone)]
pub struct PageDetailsFetcher {
    http: Client,
}

impl PageDetailsFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> MediaResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> MediaResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::DetailsFailed(e.to_string()))?;
        Ok(Self { http })
    }

    /// Fetch and scrape, surfacing request errors.
    pub async fn try_fetch(&self, url: &str) -> MediaResult<VideoDetails> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::DetailsFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::DetailsFailed(format!("HTTP {}", status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| MediaError::DetailsFailed(e.to_string()))?;

        Ok(parse_details(&html))
    }
}

#[async_trait]
impl DetailsFetcher for PageDetailsFetcher {
    async fn fetch_details(&self, url: &str) -> VideoDetails {
        match self.try_fetch(url).await {
            Ok(details) => {
                debug!(url = %url, title = ?details.title, "Fetched page details");
                details
            }
            Err(e) => {
                warn!(url = %url, "Page details unavailable: {}", e);
                VideoDetails::default()
            }
        }
    }
}

/// Extract metadata from page HTML. Missing fields stay `None`.
pub fn parse_details(html: &str) -> VideoDetails {
    let p = patterns();
    let capture = |re: &Regex, group: usize| {
        re.captures(html)
            .and_then(|c| c.get(group))
            .map(|m| decode_entities(m.as_str()))
            .filter(|s| !s.trim().is_empty())
    };

    let author = p.author.captures(html);
    let channel_url = author
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str()));
    let channel = author
        .as_ref()
        .and_then(|c| c.get(2))
        .map(|m| decode_entities(m.as_str()));

    VideoDetails {
        title: capture(&p.title, 1).map(|t| t.replace(TITLE_SUFFIX, "")),
        channel,
        channel_url,
        description: capture(&p.description, 1),
        genre: capture(&p.genre, 1),
        published_date: capture(&p.published, 1),
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
