//! Instagram lookups through the public web GraphQL endpoint.
//!
//! Anonymous requests only: the same headers the web app sends, a persisted
//! query id (`doc_id`) and the shortcode as the only variable.

use crate::config::ScraperConfig;
use crate::error::ReelError;
use crate::resolver::ReelSource;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Instagram GraphQL API endpoint.
const GRAPHQL_ENDPOINT: &str = "https://www.instagram.com/api/graphql";

/// Instagram internal app ID (public, embedded in the web app).
const IG_APP_ID: &str = "936619743392459";

/// Facebook LSD token (anti-CSRF, public static value used by web scrapers).
const FB_LSD_TOKEN: &str = "AVqbxe3J_YA";

/// Facebook ASBD ID (public, embedded in the web app).
const FB_ASBD_ID: &str = "129477";

/// Reel lookups and video downloads against Instagram
pub struct InstagramClient {
    client: reqwest::Client,
    doc_id: String,
}

impl InstagramClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, ReelError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ReelError::Unexpected(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            client,
            doc_id: config.doc_id.clone(),
        })
    }

    async fn query_shortcode(&self, shortcode: &str) -> Result<Value, ReelError> {
        let variables = serde_json::json!({ "shortcode": shortcode }).to_string();
        let form = [
            ("doc_id", self.doc_id.as_str()),
            ("variables", variables.as_str()),
            ("lsd", FB_LSD_TOKEN),
        ];

        let response = self
            .client
            .post(GRAPHQL_ENDPOINT)
            .header("X-IG-App-ID", IG_APP_ID)
            .header("X-FB-LSD", FB_LSD_TOKEN)
            .header("X-ASBD-ID", FB_ASBD_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", "https://www.instagram.com/")
            .header("Origin", "https://www.instagram.com")
            .form(&form)
            .send()
            .await
            .map_err(|e| ReelError::ResolutionFailed(format!("GraphQL request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReelError::ResolutionFailed(format!(
                "GraphQL returned HTTP {status}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ReelError::ResolutionFailed(format!("GraphQL body unreadable: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            warn!(
                error = %e,
                body = %text.chars().take(300).collect::<String>(),
                "GraphQL returned non-JSON"
            );
            ReelError::ResolutionFailed(format!("Failed to parse GraphQL response: {e}"))
        })
    }
}

/// Pull the direct video URL out of a shortcode GraphQL response.
///
/// `Ok(None)` means the post exists but is not a video.
pub fn video_url_from_response(body: &Value) -> Result<Option<String>, ReelError> {
    let media = body
        .pointer("/data/xdt_shortcode_media")
        .or_else(|| body.pointer("/data/shortcode_media"))
        .filter(|media| !media.is_null());

    let Some(media) = media else {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.contains("checkpoint_required") || message.contains("login_required") {
            return Err(ReelError::ResolutionFailed(
                "Private account or login required".to_string(),
            ));
        }
        if message.contains("doc_id") || message.contains("useragent mismatch") {
            return Err(ReelError::ResolutionFailed(format!(
                "doc_id may be expired: {message}"
            )));
        }
        return Err(ReelError::ResolutionFailed(
            "Post not found or media unavailable".to_string(),
        ));
    };

    let video_url = media
        .get("video_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(String::from);

    Ok(video_url)
}

#[async_trait]
impl ReelSource for InstagramClient {
    #[instrument(skip(self))]
    async fn media_url(&self, shortcode: &str) -> Result<Option<String>, ReelError> {
        let body = self.query_shortcode(shortcode).await?;
        let video_url = video_url_from_response(&body)?;
        debug!(has_video = video_url.is_some(), "Shortcode lookup finished");
        Ok(video_url)
    }

    #[instrument(skip(self, media_url))]
    async fn download(&self, media_url: &str) -> Result<Bytes, ReelError> {
        let response = self
            .client
            .get(media_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ReelError::ResolutionFailed(format!("Media download failed: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ReelError::ResolutionFailed(format!("Media download failed: {e}")))?;

        debug!(size_bytes = bytes.len(), "Media downloaded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_video_url_from_xdt_media() {
        let body = json!({
            "data": {
                "xdt_shortcode_media": {
                    "is_video": true,
                    "video_url": "https://cdn.example/video.mp4"
                }
            }
        });
        assert_eq!(
            video_url_from_response(&body).unwrap().as_deref(),
            Some("https://cdn.example/video.mp4")
        );
    }

    #[test]
    fn test_video_url_from_legacy_media_key() {
        let body = json!({
            "data": { "shortcode_media": { "video_url": "https://cdn.example/v.mp4" } }
        });
        assert!(video_url_from_response(&body).unwrap().is_some());
    }

    #[test]
    fn test_photo_post_has_no_video() {
        let body = json!({
            "data": {
                "xdt_shortcode_media": {
                    "is_video": false,
                    "display_url": "https://cdn.example/photo.jpg"
                }
            }
        });
        assert_eq!(video_url_from_response(&body).unwrap(), None);
    }

    #[test]
    fn test_missing_media_is_resolution_failure() {
        let body = json!({ "data": { "xdt_shortcode_media": null } });
        assert!(matches!(
            video_url_from_response(&body),
            Err(ReelError::ResolutionFailed(msg)) if msg.contains("not found")
        ));
    }

    #[test]
    fn test_login_required_reported() {
        let body = json!({ "message": "login_required", "status": "fail" });
        assert!(matches!(
            video_url_from_response(&body),
            Err(ReelError::ResolutionFailed(msg)) if msg.contains("login")
        ));
    }

    #[test]
    fn test_client_builds_from_default_config() {
        assert!(InstagramClient::new(&ScraperConfig::default()).is_ok());
    }
}
