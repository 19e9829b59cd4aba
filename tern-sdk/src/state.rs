//! Connection-scoped session data.
//!
//! A fresh [`Session`] is installed on every successful `connect()`, which is
//! the only way connection-scoped data is reset. Channel, MOTD and server
//! tables are filled in by the built-in tracking handlers and read through
//! the query methods at the bottom of this file.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLockReadGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::codec::Encoder;
use crate::rate::RateLimiter;

/// Mode prefixes servers put in front of nicknames in NAMES replies.
const NICK_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// A channel we are currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Name as the server first sent it.
    pub name: String,
    pub users: BTreeSet<String>,
    pub topic: Option<String>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: BTreeSet::new(),
            topic: None,
        }
    }

    fn remove_user(&mut self, nick: &str) -> bool {
        let found = self
            .users
            .iter()
            .find(|u| u.eq_ignore_ascii_case(nick))
            .cloned();
        match found {
            Some(user) => self.users.remove(&user),
            None => false,
        }
    }
}

pub(crate) struct Session {
    pub(crate) encoder: Option<Arc<tokio::sync::Mutex<Encoder>>>,
    /// Cancelled on teardown so writes stuck on a stalled socket give up.
    pub(crate) closing: CancellationToken,
    pub(crate) connected: bool,
    pub(crate) connect_time: Option<DateTime<Utc>>,
    pub(crate) connected_at: Option<Instant>,
    pub(crate) last_write: Option<Instant>,
    pub(crate) nick: String,
    pub(crate) rate: RateLimiter,

    /// Keyed by lower-cased channel name.
    pub(crate) channels: HashMap<String, Channel>,
    pub(crate) server_options: HashMap<String, String>,
    pub(crate) server_name: Option<String>,
    pub(crate) server_version: Option<String>,
    pub(crate) motd: Vec<String>,
    /// Capability name -> advertised value (empty when none).
    pub(crate) caps_available: BTreeMap<String, String>,
    pub(crate) caps_enabled: BTreeSet<String>,
    pub(crate) cap_negotiating: bool,
}

impl Session {
    pub(crate) fn new(nick: &str, rate: RateLimiter) -> Self {
        Self {
            encoder: None,
            closing: CancellationToken::new(),
            connected: false,
            connect_time: None,
            connected_at: None,
            last_write: None,
            nick: nick.to_string(),
            rate,
            channels: HashMap::new(),
            server_options: HashMap::new(),
            server_name: None,
            server_version: None,
            motd: Vec::new(),
            caps_available: BTreeMap::new(),
            caps_enabled: BTreeSet::new(),
            cap_negotiating: false,
        }
    }

    pub(crate) fn is_me(&self, nick: &str) -> bool {
        self.nick.eq_ignore_ascii_case(nick)
    }

    pub(crate) fn join(&mut self, channel: &str, nick: &str) {
        let key = channel.to_lowercase();
        if self.is_me(nick) {
            self.channels
                .entry(key.clone())
                .or_insert_with(|| Channel::new(channel));
        }
        if let Some(chan) = self.channels.get_mut(&key) {
            chan.users.insert(nick.to_string());
        }
    }

    /// Handles both PART and KICK: `nick` leaves `channel`.
    pub(crate) fn part(&mut self, channel: &str, nick: &str) {
        let key = channel.to_lowercase();
        if self.is_me(nick) {
            self.channels.remove(&key);
        } else if let Some(chan) = self.channels.get_mut(&key) {
            chan.remove_user(nick);
        }
    }

    pub(crate) fn quit(&mut self, nick: &str) {
        for chan in self.channels.values_mut() {
            chan.remove_user(nick);
        }
    }

    pub(crate) fn rename(&mut self, old: &str, new: &str) {
        for chan in self.channels.values_mut() {
            if chan.remove_user(old) {
                chan.users.insert(new.to_string());
            }
        }
        if self.is_me(old) {
            self.nick = new.to_string();
        }
    }

    /// Add users from a NAMES reply, stripping mode prefixes.
    pub(crate) fn names(&mut self, channel: &str, names: &str) {
        let Some(chan) = self.channels.get_mut(&channel.to_lowercase()) else {
            return;
        };
        for name in names.split_whitespace() {
            let nick = name.trim_start_matches(NICK_PREFIXES);
            // userhost-in-names
            let nick = nick.split_once('!').map_or(nick, |(n, _)| n);
            if !nick.is_empty() {
                chan.users.insert(nick.to_string());
            }
        }
    }

    pub(crate) fn set_topic(&mut self, channel: &str, topic: &str) {
        if let Some(chan) = self.channels.get_mut(&channel.to_lowercase()) {
            chan.topic = (!topic.is_empty()).then(|| topic.to_string());
        }
    }

    /// Apply ISUPPORT tokens (`KEY=VALUE`, `KEY`, or `-KEY` to unset).
    pub(crate) fn isupport<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for token in tokens {
            if let Some(key) = token.strip_prefix('-') {
                self.server_options.remove(key);
                continue;
            }
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            if !key.is_empty() {
                self.server_options
                    .insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// Queries over tracked session data.
///
/// All of these panic if tracking was disabled with
/// [`Client::disable_tracking`], as the underlying tables are no longer
/// maintained.
impl Client {
    fn tracked(&self, query: &str) -> RwLockReadGuard<'_, Session> {
        if !self.tracking_enabled() {
            panic!("{query}() called after tracking was disabled");
        }
        self.session()
    }

    /// Our current nickname as confirmed by the server.
    pub fn nick(&self) -> String {
        self.tracked("nick").nick.clone()
    }

    /// Names of every channel we are in, sorted.
    pub fn channels(&self) -> Vec<String> {
        let state = self.tracked("channels");
        let mut names: Vec<String> = state.channels.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    pub fn is_in_channel(&self, channel: &str) -> bool {
        self.tracked("is_in_channel")
            .channels
            .contains_key(&channel.to_lowercase())
    }

    pub fn channel(&self, channel: &str) -> Option<Channel> {
        self.tracked("channel")
            .channels
            .get(&channel.to_lowercase())
            .cloned()
    }

    pub fn channel_users(&self, channel: &str) -> Option<Vec<String>> {
        self.tracked("channel_users")
            .channels
            .get(&channel.to_lowercase())
            .map(|c| c.users.iter().cloned().collect())
    }

    /// A token from the server's ISUPPORT (005) replies.
    pub fn server_option(&self, key: &str) -> Option<String> {
        self.tracked("server_option")
            .server_options
            .get(key)
            .cloned()
    }

    pub fn server_name(&self) -> Option<String> {
        self.tracked("server_name").server_name.clone()
    }

    /// The NETWORK ISUPPORT token.
    pub fn network_name(&self) -> Option<String> {
        self.server_option("NETWORK")
    }

    pub fn server_version(&self) -> Option<String> {
        self.tracked("server_version").server_version.clone()
    }

    pub fn motd(&self) -> String {
        self.tracked("motd").motd.join("\n")
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.tracked("has_capability")
            .caps_enabled
            .iter()
            .any(|c| c.eq_ignore_ascii_case(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("tern", RateLimiter::default())
    }

    #[test]
    fn join_creates_channel_only_for_self() {
        let mut s = session();
        s.join("#rust", "alice");
        assert!(s.channels.is_empty());

        s.join("#Rust", "tern");
        s.join("#rust", "alice");
        let chan = &s.channels["#rust"];
        assert_eq!(chan.name, "#Rust");
        assert!(chan.users.contains("alice"));
        assert!(chan.users.contains("tern"));
    }

    #[test]
    fn part_and_kick_remove_users() {
        let mut s = session();
        s.join("#a", "tern");
        s.join("#a", "bob");
        s.part("#a", "BOB");
        assert!(!s.channels["#a"].users.contains("bob"));

        s.part("#a", "tern");
        assert!(s.channels.is_empty());
    }

    #[test]
    fn quit_and_rename_touch_every_channel() {
        let mut s = session();
        for chan in ["#a", "#b"] {
            s.join(chan, "tern");
            s.join(chan, "carol");
        }
        s.rename("carol", "caz");
        assert!(s.channels.values().all(|c| c.users.contains("caz")));

        s.quit("caz");
        assert!(s.channels.values().all(|c| !c.users.contains("caz")));

        s.rename("tern", "tern2");
        assert_eq!(s.nick, "tern2");
        assert!(s.channels["#a"].users.contains("tern2"));
    }

    #[test]
    fn names_strip_prefixes() {
        let mut s = session();
        s.join("#a", "tern");
        s.names("#a", "@op +voice @+both plain nick!user@host");
        let users = &s.channels["#a"].users;
        for nick in ["op", "voice", "both", "plain", "nick"] {
            assert!(users.contains(nick), "missing {nick}");
        }
    }

    #[test]
    fn isupport_sets_and_unsets() {
        let mut s = session();
        s.isupport(["NETWORK=Libera", "SAFELIST", "CHANTYPES=#"]);
        assert_eq!(s.server_options["NETWORK"], "Libera");
        assert_eq!(s.server_options["SAFELIST"], "");
        s.isupport(["-SAFELIST"]);
        assert!(!s.server_options.contains_key("SAFELIST"));
    }

    #[test]
    fn empty_topic_clears() {
        let mut s = session();
        s.join("#a", "tern");
        s.set_topic("#a", "hello");
        assert_eq!(s.channels["#a"].topic.as_deref(), Some("hello"));
        s.set_topic("#a", "");
        assert_eq!(s.channels["#a"].topic, None);
    }
}
