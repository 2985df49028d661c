use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum RelayError {
    /// The webhook could not be reached or did not answer in time
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid webhook response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    reel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    message: Option<String>,
}

/// What the webhook said about a relayed link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted { message: Option<String> },
    Rejected { status: u16, message: String },
}

/// Posts reel links to the webhook service
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn relay(&self, reel_url: &str) -> Result<RelayOutcome, RelayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&WebhookRequest { reel_url })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "Webhook answered");

        let message = serde_json::from_str::<WebhookReply>(&body)
            .ok()
            .and_then(|reply| reply.message);

        if status.is_success() {
            return Ok(RelayOutcome::Accepted { message });
        }

        let message = match message {
            Some(message) => message,
            None if !body.trim().is_empty() => body.trim().chars().take(200).collect(),
            None => {
                return Err(RelayError::InvalidResponse(format!(
                    "HTTP {} with empty body",
                    status.as_u16()
                )))
            }
        };

        Ok(RelayOutcome::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Chat reply for a relayed link
pub fn reply_text(reel_url: &str, result: &Result<RelayOutcome, RelayError>) -> String {
    match result {
        Ok(RelayOutcome::Accepted { message: Some(message) }) => {
            format!("✅ Sent: {reel_url}\n{message}")
        }
        Ok(RelayOutcome::Accepted { message: None }) => format!("✅ Sent: {reel_url}"),
        Ok(RelayOutcome::Rejected { status, message }) => {
            format!("❌ Server error ({status}): {message}")
        }
        Err(e) => format!("❌ Failed to send: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn client(endpoint: String) -> WebhookClient {
        WebhookClient::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_relay_success_posts_reel_url() {
        let endpoint = serve(Router::new().route(
            "/",
            post(|Json(body): Json<Value>| async move {
                let url = body["reel_url"].as_str().unwrap_or_default().to_string();
                Json(json!({ "status": "success", "message": format!("queued {url}") }))
            }),
        ))
        .await;

        let outcome = client(endpoint)
            .relay("https://instagram.com/reel/ABC123")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Accepted {
                message: Some("queued https://instagram.com/reel/ABC123".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_relay_server_error() {
        let endpoint = serve(Router::new().route(
            "/",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "status": "error", "message": "Invalid Instagram Reel URL." })),
                )
            }),
        ))
        .await;

        let result = client(endpoint).relay("https://instagram.com/reel/x").await;

        assert_eq!(
            reply_text("https://instagram.com/reel/x", &result),
            "❌ Server error (400): Invalid Instagram Reel URL."
        );
    }

    #[tokio::test]
    async fn test_relay_plain_text_error_body() {
        let endpoint = serve(Router::new().route(
            "/",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let outcome = client(endpoint).relay("https://instagram.com/reel/x").await.unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                status: 502,
                message: "upstream down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_relay_unreachable_webhook() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client(format!("http://{addr}/"))
            .relay("https://instagram.com/reel/x")
            .await;

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert!(reply_text("https://instagram.com/reel/x", &result)
            .starts_with("❌ Failed to send: "));
    }

    #[test]
    fn test_reply_text_success() {
        let ok = Ok(RelayOutcome::Accepted {
            message: Some("Saved reel".to_string()),
        });
        assert_eq!(
            reply_text("https://instagram.com/reel/A", &ok),
            "✅ Sent: https://instagram.com/reel/A\nSaved reel"
        );

        let bare = Ok(RelayOutcome::Accepted { message: None });
        assert_eq!(
            reply_text("https://instagram.com/reel/A", &bare),
            "✅ Sent: https://instagram.com/reel/A"
        );
    }
}
