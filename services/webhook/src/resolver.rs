use crate::error::ReelError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Substring every accepted reel URL must contain
pub const REEL_MARKER: &str = "instagram.com/reel/";

const INVALID_URL_MESSAGE: &str = "Invalid Instagram Reel URL.";

/// A reel whose direct video URL is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReel {
    /// Shortcode taken from the reel URL
    pub shortcode: String,
    /// Direct, time-limited CDN URL of the video
    pub media_url: String,
}

impl ResolvedReel {
    /// Object key the video is stored under
    pub fn object_key(&self) -> String {
        format!("{}.mp4", self.shortcode)
    }
}

/// Scraping backend that knows how to look up a post by shortcode
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReelSource: Send + Sync {
    /// Direct video URL for a shortcode, `None` when the post carries no video
    async fn media_url(&self, shortcode: &str) -> Result<Option<String>, ReelError>;

    /// Fetch the bytes behind a direct media URL
    async fn download(&self, media_url: &str) -> Result<Bytes, ReelError>;
}

/// Extract the shortcode from a reel URL.
///
/// Accepts `https://www.instagram.com/reel/<code>/?igsh=...` as well as the
/// scheme-less `instagram.com/reel/<code>` form.
pub fn extract_shortcode(reel_url: &str) -> Result<String, ReelError> {
    let trimmed = reel_url.trim();
    if !trimmed.contains(REEL_MARKER) {
        return Err(ReelError::InvalidInput(INVALID_URL_MESSAGE.to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate)
        .map_err(|_| ReelError::InvalidInput(INVALID_URL_MESSAGE.to_string()))?;

    let host = url.host_str().unwrap_or_default().to_lowercase();
    if host != "instagram.com" && !host.ends_with(".instagram.com") {
        return Err(ReelError::InvalidInput(INVALID_URL_MESSAGE.to_string()));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let shortcode = segments
        .iter()
        .position(|s| *s == "reel")
        .and_then(|i| segments.get(i + 1))
        .filter(|code| {
            code.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .ok_or_else(|| ReelError::InvalidInput(INVALID_URL_MESSAGE.to_string()))?;

    Ok((*shortcode).to_string())
}

/// Turns reel URLs into direct media URLs
#[derive(Clone)]
pub struct Resolver {
    source: Arc<dyn ReelSource>,
}

impl Resolver {
    pub fn new(source: Arc<dyn ReelSource>) -> Self {
        Self { source }
    }

    /// Validate the URL and look up its video. One attempt, no retries.
    #[instrument(skip(self))]
    pub async fn resolve(&self, reel_url: &str) -> Result<ResolvedReel, ReelError> {
        let shortcode = extract_shortcode(reel_url)?;

        let media_url = self
            .source
            .media_url(&shortcode)
            .await?
            .ok_or_else(|| ReelError::NoMediaFound(shortcode.clone()))?;

        debug!(shortcode = %shortcode, "Reel resolved");

        Ok(ResolvedReel {
            shortcode,
            media_url,
        })
    }

    /// Download the video of a resolved reel
    pub async fn download(&self, reel: &ResolvedReel) -> Result<Bytes, ReelError> {
        self.source.download(&reel.media_url).await
    }
}
