use anyhow::{Context, Result};
use relay_bot::{setup_handler, Config, WebhookClient};
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    let client = Arc::new(
        WebhookClient::new(config.webhook.url.clone(), config.webhook_timeout())
            .context("Failed to build webhook client")?,
    );

    let bot = Bot::new(config.bot.token.clone());

    info!(webhook = %config.webhook.url, "Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![client])
        // Every update shares one key, so messages are handled one at a time
        .distribution_function(|_| Some(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
