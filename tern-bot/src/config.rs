//! Bot configuration.
//!
//! Read from `~/.config/tern/bot.toml` (or `--config`), then overridden by
//! command-line flags. Every field is optional in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_SERVER: &str = "irc.libera.chat";
pub const DEFAULT_PORT: u32 = 6697;
pub const DEFAULT_NICK: &str = "ternbot";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    pub server: Option<String>,
    pub port: Option<u32>,
    pub password: Option<String>,
    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: Option<String>,
    pub tls: Option<bool>,
    pub tls_insecure: Option<bool>,
    /// Channels joined once the server welcomes us.
    pub channels: Vec<String>,
    /// Nicks allowed to use `!quit`.
    pub admins: Vec<String>,
    pub retries: Option<u32>,
    pub reconnect_delay_secs: Option<u64>,
    pub allow_flood: Option<bool>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tern")
        .join("bot.toml")
}

impl BotConfig {
    /// Load `path`. A missing file at the default location is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_path(), false),
        };
        if !required && !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn is_admin(&self, nick: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(nick))
    }

    pub fn to_client_config(&self) -> tern_sdk::Config {
        let defaults = tern_sdk::Config::default();
        let nick = self.nick.clone().unwrap_or_else(|| DEFAULT_NICK.to_string());
        tern_sdk::Config {
            server: self.server.clone().unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            password: self.password.clone(),
            user: self.user.clone().unwrap_or_else(|| nick.clone()),
            name: self.realname.clone().unwrap_or_else(|| "tern bot".to_string()),
            nick,
            tls: self.tls.unwrap_or(false),
            tls_insecure: self.tls_insecure.unwrap_or(false),
            retries: self.retries.unwrap_or(defaults.retries),
            reconnect_delay: self
                .reconnect_delay_secs
                .map_or(defaults.reconnect_delay, Duration::from_secs),
            allow_flood: self.allow_flood.unwrap_or(false),
            version: concat!("tern-bot ", env!("CARGO_PKG_VERSION")).to_string(),
            ..defaults
        }
    }
}
