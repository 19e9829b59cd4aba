//! Echo bot example: joins a channel and repeats `!echo` arguments back.
//!
//! Usage:
//!   cargo run --example echo_bot -- --server irc.libera.chat --port 6697 \
//!     --nick ternecho --channel "#tern-test"

use clap::Parser;
use tern_sdk::consts::{PRIVMSG, RPL_WELCOME};
use tern_sdk::{Client, Config, Event};

#[derive(Parser)]
#[command(name = "echo-bot", about = "tern-sdk echo bot example")]
struct Args {
    #[arg(long, default_value = "irc.libera.chat")]
    server: String,
    #[arg(long, default_value_t = 6697)]
    port: u32,
    #[arg(long, default_value = "ternecho")]
    nick: String,
    #[arg(long, default_value = "#tern-test")]
    channel: String,
}

#[tokio::main]
async fn main() -> tern_sdk::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = Client::new(Config {
        server: args.server,
        port: args.port,
        nick: args.nick.clone(),
        user: args.nick,
        name: "tern-sdk echo bot".to_string(),
        ..Config::default()
    });

    let channel = args.channel;
    client.handlers().add(RPL_WELCOME, move |client, _| {
        let channel = channel.clone();
        async move {
            if let Err(e) = client.join(&[channel.as_str()]).await {
                tracing::warn!("join failed: {e}");
            }
        }
    });

    client.handlers().add(PRIVMSG, |client, event: Event| async move {
        let (Some(target), Some(text)) = (event.params.first(), event.trailing.as_deref()) else {
            return;
        };
        let Some(rest) = text.strip_prefix("!echo ") else {
            return;
        };
        let reply_to = if event.is_from_channel() {
            target.as_str()
        } else {
            event.source_name().unwrap_or_default()
        };
        if let Err(e) = client.message(reply_to, rest).await {
            tracing::warn!("echo failed: {e}");
        }
    });

    client.connect().await?;
    client.run().await
}
