use crate::normalize::{find_reel_link, normalize_reel_url};
use crate::webhook_client::{reply_text, WebhookClient};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{info, warn};

pub const USAGE_HINT: &str = "⚠️ Please send a valid Instagram Reel URL.";

/// Build the update handler: plain text messages only, commands are ignored
pub fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some_and(|text| !text.starts_with('/')))
        .endpoint(handle_text)
}

async fn handle_text(bot: Bot, msg: Message, client: Arc<WebhookClient>) -> ResponseResult<()> {
    let text = msg.text().unwrap_or_default();
    let reply = relay_reply(&client, text).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Forward a reel link to the webhook and describe the result for the chat
pub async fn relay_reply(client: &WebhookClient, text: &str) -> String {
    let Some(link) = find_reel_link(text) else {
        return USAGE_HINT.to_string();
    };

    let Some(reel_url) = normalize_reel_url(link) else {
        return USAGE_HINT.to_string();
    };

    info!(reel_url = %reel_url, "Relaying reel link");
    let result = client.relay(&reel_url).await;
    if let Err(e) = &result {
        warn!(reel_url = %reel_url, error = %e, "Webhook call failed");
    }

    reply_text(&reel_url, &result)
}
