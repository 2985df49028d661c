//! Relay Bot
//!
//! Telegram bot that forwards Instagram Reel links typed into a chat to the
//! reel webhook and answers with what the webhook said.

pub mod config;
pub mod handler;
pub mod normalize;
pub mod webhook_client;

pub use config::Config;
pub use handler::{relay_reply, setup_handler};
pub use normalize::normalize_reel_url;
pub use webhook_client::{RelayError, RelayOutcome, WebhookClient};
