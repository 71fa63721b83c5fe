#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tg_ssh_bot::bot::client::RusshConnector;
use tg_ssh_bot::bot::telegram::polling::run_polling;
use tg_ssh_bot::bot::telegram::webhook::{WebhookState, run_webhook};
use tg_ssh_bot::bot::telegram::{BOT_COMMANDS, TelegramApi, TelegramTransport};
use tg_ssh_bot::bot::{
    Bot, BotConfig, Delivery, Dispatcher, TelegramConfig, reap_period, spawn_idle_reaper,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let config = BotConfig::from_env()?;
    let telegram = TelegramConfig::from_env()?;
    info!(
        "Starting SSH bot for {} authorized user(s), host key policy {}",
        config.access.len(),
        config.ssh.host_key_policy
    );

    let connector = Arc::new(RusshConnector::new(config.ssh));
    let bot = Arc::new(Bot::new(&config, connector));
    let api = TelegramApi::new(&telegram.token)?;
    let transport = Arc::new(TelegramTransport::new(api.clone()));
    let dispatcher = Arc::new(Dispatcher::new(bot.clone(), transport));

    if let Err(e) = api.set_my_commands(BOT_COMMANDS).await {
        warn!("Could not register bot commands: {}", e);
    }

    let cancel = CancellationToken::new();
    let reaper = config.idle_timeout.map(|max_idle| {
        info!("Evicting sessions idle for more than {:?}", max_idle);
        spawn_idle_reaper(
            bot.registry().clone(),
            max_idle,
            reap_period(max_idle),
            cancel.clone(),
        )
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let result: Result<(), Box<dyn std::error::Error>> = match telegram.delivery {
        Delivery::LongPolling { timeout } => {
            run_polling(api, dispatcher.clone(), timeout, cancel.clone())
                .await
                .map_err(Into::into)
        }
        Delivery::Webhook { url, secret, port } => {
            let state = Arc::new(WebhookState {
                api,
                dispatcher: dispatcher.clone(),
                secret,
            });
            run_webhook(state, &url, port, cancel.clone()).await
        }
    };

    cancel.cancel();
    dispatcher.close();
    if let Some(reaper) = reaper
        && let Err(e) = reaper.await
    {
        warn!("Idle reaper ended abnormally: {}", e);
    }
    bot.registry().shutdown().await;

    result
}
