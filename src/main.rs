//! Bridgekeeper - Minecraft guild chat to Discord bridge
//!
//! Relays guild, officer and party chat between a Minecraft server and
//! Discord channels, impersonating players through webhooks and pushing
//! Discord messages back through headless bot accounts.

mod bridge;
mod common;
mod config;
mod discord;
mod game;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use anyhow::Result;
use serenity::all::GatewayIntents;
use serenity::Client;
use tokio::signal;
use tracing::{error, info, warn};

use config::env::get_config_path;
use config::load_and_validate;
use discord::GatewayHandler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Bridgekeeper v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!(
            "Please ensure {} exists and is properly formatted.",
            config_path
        );
        e
    })?;

    info!("Configuration loaded successfully");
    for account in &config.accounts {
        info!(
            "  Account: {} via {} (guild: {})",
            account.username,
            account.gateway,
            account.guild_name.as_deref().unwrap_or("unnamed"),
        );
    }

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_EMOJIS_AND_STICKERS;

    let token = config.discord.token.clone();
    let handler = Arc::new(GatewayHandler::new(config));
    let mut client = Client::builder(&token, intents)
        .event_handler_arc(Arc::clone(&handler))
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down...");
        shard_manager.shutdown_all().await;
    });

    let result = client.start().await;

    // Disconnect the game accounts before the process goes away.
    if let Some(manager) = handler.manager() {
        manager.stop().await;
    }

    if let Err(e) = result {
        error!("Discord client error: {}", e);
        return Err(e.into());
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
