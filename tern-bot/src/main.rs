//! tern-bot: a small IRC bot built on tern-sdk.
//!
//! Joins the configured channels once registered and answers:
//!
//!   !ping     pong
//!   !uptime   how long the connection has been up
//!   !help     list commands
//!   !quit     disconnect and exit (admins only)

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tern_sdk::consts::{DISCONNECTED, PRIVMSG, RPL_WELCOME};
use tern_sdk::{Client, Event};

use crate::config::BotConfig;

const PREFIX: char = '!';

#[derive(Parser)]
#[command(name = "tern-bot", about = "Small IRC bot built on tern-sdk")]
struct Args {
    /// Config file (default: ~/.config/tern/bot.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// IRC server hostname
    #[arg(long, env = "TERN_SERVER")]
    server: Option<String>,

    #[arg(long)]
    port: Option<u32>,

    /// Bot nick
    #[arg(long)]
    nick: Option<String>,

    /// Channel to join (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Nick allowed to use !quit (repeatable)
    #[arg(long = "admin")]
    admins: Vec<String>,

    /// Use TLS
    #[arg(long)]
    tls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    tls_insecure: bool,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut BotConfig) {
        if self.server.is_some() {
            config.server = self.server;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.nick.is_some() {
            config.nick = self.nick;
        }
        config.channels.extend(self.channels);
        config.admins.extend(self.admins);
        if self.tls {
            config.tls = Some(true);
        }
        if self.tls_insecure {
            config.tls_insecure = Some(true);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "tern_bot=debug,tern_sdk=debug"
    } else {
        "tern_bot=info,tern_sdk=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut config = BotConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    let config = Arc::new(config);

    let client = Client::new(config.to_client_config());
    register(&client, config.clone());

    tracing::info!(
        server = %client.server(),
        channels = ?config.channels,
        "tern-bot starting"
    );
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", client.server()))?;
    client.run().await.context("connection lost")?;
    tracing::info!("tern-bot stopped");
    Ok(())
}

fn register(client: &Client, config: Arc<BotConfig>) {
    let channels = config.channels.clone();
    client.handlers().add(RPL_WELCOME, move |client, _| {
        let channels = channels.clone();
        async move {
            if channels.is_empty() {
                return;
            }
            let channels: Vec<&str> = channels.iter().map(String::as_str).collect();
            if let Err(e) = client.join(&channels).await {
                tracing::warn!("Failed to join {channels:?}: {e}");
            }
        }
    });

    client.handlers().add(DISCONNECTED, |_, event: Event| async move {
        tracing::warn!("Disconnected from {}", event.last().unwrap_or("server"));
    });

    client.handlers().add(PRIVMSG, move |client, event| {
        let config = config.clone();
        async move {
            if let Err(e) = handle_command(&client, &config, &event).await {
                tracing::warn!("Command failed: {e}");
            }
        }
    });
}

async fn handle_command(client: &Client, config: &BotConfig, event: &Event) -> Result<()> {
    let (Some(sender), Some(text)) = (event.source_name(), event.trailing.as_deref()) else {
        return Ok(());
    };
    let Some(command) = text.strip_prefix(PREFIX) else {
        return Ok(());
    };
    let command = command.split_whitespace().next().unwrap_or_default();
    let reply_to = match event.params.first() {
        Some(target) if event.is_from_channel() => target.as_str(),
        _ => sender,
    };

    match command {
        "ping" => client.message(reply_to, "pong").await?,
        "uptime" => {
            let text = match client.connection_duration() {
                Ok(up) => format!("connected for {}", format_duration(up)),
                Err(e) => e.to_string(),
            };
            client.message(reply_to, &text).await?;
        }
        "help" => {
            client
                .message(reply_to, "commands: !ping !uptime !help !quit")
                .await?;
        }
        "quit" if config.is_admin(sender) => {
            tracing::info!("Stopping at the request of {sender}");
            client
                .stop_with_message(&format!("requested by {sender}"))
                .await;
        }
        "quit" => {
            client.notice(sender, "!quit is for admins only").await?;
        }
        _ => {}
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins, secs) = (secs / 86400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m {secs}s")
    } else {
        format!("{mins}m {secs}s")
    }
}
