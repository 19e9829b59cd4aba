//! CTCP: `\x01COMMAND text\x01` requests embedded in PRIVMSG, answered with
//! NOTICE.
//!
//! Requests are routed to the handler registered for their command after
//! the regular event handlers have run. Replies are decoded too, but never
//! routed, so two clients cannot ping-pong each other forever.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::Client;
use crate::consts::{NOTICE, PRIVMSG};
use crate::error::{Error, Result};
use crate::event::{Event, Source};

const DELIM: char = '\x01';

pub const ACTION: &str = "ACTION";
pub const CLIENTINFO: &str = "CLIENTINFO";
pub const PING: &str = "PING";
pub const TIME: &str = "TIME";
pub const VERSION: &str = "VERSION";

/// A decoded CTCP request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtcpEvent {
    pub source: Source,
    /// Our nick or the channel the request was sent to.
    pub target: String,
    /// Upper-case CTCP command.
    pub command: String,
    pub text: String,
    /// Sent as NOTICE.
    pub reply: bool,
}

impl CtcpEvent {
    /// Where replies should go: the sender, never the channel.
    pub fn reply_to(&self) -> &str {
        &self.source.name
    }
}

/// Extract a CTCP message from a PRIVMSG or NOTICE.
pub fn decode_ctcp(event: &Event) -> Option<CtcpEvent> {
    let reply = match event.command.as_str() {
        PRIVMSG => false,
        NOTICE => true,
        _ => return None,
    };
    let source = event.source.clone()?;
    let target = event.params.first()?.clone();
    let body = event
        .trailing
        .as_deref()?
        .strip_prefix(DELIM)?
        .strip_suffix(DELIM)?;

    let (command, text) = body.split_once(' ').unwrap_or((body, ""));
    if command.is_empty() || command.contains(char::is_whitespace) {
        return None;
    }
    Some(CtcpEvent {
        source,
        target,
        command: command.to_ascii_uppercase(),
        text: text.to_string(),
        reply,
    })
}

/// Wrap `command` and `text` into a CTCP payload.
pub fn encode_ctcp(command: &str, text: &str) -> Result<String> {
    if command.is_empty() || command.contains([' ', DELIM, '\r', '\n', '\0']) {
        return Err(Error::InvalidCtcp);
    }
    if text.contains([DELIM, '\r', '\n', '\0']) {
        return Err(Error::InvalidCtcp);
    }
    let command = command.to_ascii_uppercase();
    Ok(if text.is_empty() {
        format!("{DELIM}{command}{DELIM}")
    } else {
        format!("{DELIM}{command} {text}{DELIM}")
    })
}

pub type CtcpFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Answers one CTCP command.
pub trait CtcpHandler: Send + Sync + 'static {
    fn call(&self, client: Client, event: CtcpEvent) -> CtcpFuture;
}

impl<F, Fut> CtcpHandler for F
where
    F: Fn(Client, CtcpEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, client: Client, event: CtcpEvent) -> CtcpFuture {
        Box::pin(self(client, event))
    }
}

/// CTCP handler registry, one handler per command. Comes with VERSION,
/// PING, TIME and CLIENTINFO.
pub struct Ctcp {
    handlers: RwLock<HashMap<String, Arc<dyn CtcpHandler>>>,
}

impl Default for Ctcp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ctcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctcp")
            .field("commands", &self.commands())
            .finish()
    }
}

impl Ctcp {
    pub fn new() -> Self {
        let ctcp = Self {
            handlers: RwLock::new(HashMap::new()),
        };
        ctcp.set(VERSION, reply_version);
        ctcp.set(PING, reply_ping);
        ctcp.set(TIME, reply_time);
        ctcp.set(CLIENTINFO, reply_clientinfo);
        ctcp
    }

    /// Install the handler for `command`, replacing any existing one.
    pub fn set<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(Client, CtcpEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .write()
            .insert(command.to_ascii_uppercase(), Arc::new(handler));
    }

    /// Stop answering `command`.
    pub fn clear(&self, command: &str) {
        self.handlers.write().remove(&command.to_ascii_uppercase());
    }

    /// Stop answering every CTCP command, defaults included.
    pub fn clear_all(&self) {
        self.handlers.write().clear();
    }

    /// Commands with a handler, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.handlers.read().keys().cloned().collect();
        commands.sort();
        commands
    }

    /// Run the handler for a decoded request. Replies are ignored.
    pub async fn call(&self, client: &Client, event: CtcpEvent) {
        if event.reply {
            return;
        }
        let handler = self.handlers.read().get(&event.command).cloned();
        let Some(handler) = handler else {
            tracing::debug!("No CTCP handler for {}", event.command);
            return;
        };
        handler.call(client.clone(), event).await;
    }
}

async fn send_reply(client: &Client, event: &CtcpEvent, text: &str) {
    if let Err(e) = client
        .send_ctcp_reply(event.reply_to(), &event.command, text)
        .await
    {
        tracing::debug!("Failed to answer CTCP {}: {e}", event.command);
    }
}

async fn reply_version(client: Client, event: CtcpEvent) {
    let version = client.config().version.clone();
    send_reply(&client, &event, &version).await;
}

async fn reply_ping(client: Client, event: CtcpEvent) {
    send_reply(&client, &event, &event.text).await;
}

async fn reply_time(client: Client, event: CtcpEvent) {
    let now = chrono::Local::now().to_rfc2822();
    send_reply(&client, &event, &now).await;
}

async fn reply_clientinfo(client: Client, event: CtcpEvent) {
    let commands = client.ctcp().commands().join(" ");
    send_reply(&client, &event, &commands).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privmsg(trailing: &str) -> Event {
        Event::parse(&format!(":alice!a@host PRIVMSG tern :{trailing}")).unwrap()
    }

    #[test]
    fn decodes_requests_and_replies() {
        let ctcp = decode_ctcp(&privmsg("\x01version\x01")).unwrap();
        assert_eq!(ctcp.command, "VERSION");
        assert_eq!(ctcp.text, "");
        assert!(!ctcp.reply);
        assert_eq!(ctcp.reply_to(), "alice");

        let ctcp = decode_ctcp(&privmsg("\x01ACTION waves hello\x01")).unwrap();
        assert_eq!(ctcp.command, ACTION);
        assert_eq!(ctcp.text, "waves hello");

        let notice =
            Event::parse(":bob!b@host NOTICE tern :\x01PING 12345\x01").unwrap();
        assert!(decode_ctcp(&notice).unwrap().reply);
    }

    #[test]
    fn ignores_plain_and_malformed_messages() {
        assert!(decode_ctcp(&privmsg("hello")).is_none());
        assert!(decode_ctcp(&privmsg("\x01VERSION")).is_none());
        assert!(decode_ctcp(&privmsg("\x01\x01")).is_none());
        let no_source = Event::new(PRIVMSG, ["tern"]).with_trailing("\x01VERSION\x01");
        assert!(decode_ctcp(&no_source).is_none());
        let join = Event::parse(":a!b@c JOIN #chan").unwrap();
        assert!(decode_ctcp(&join).is_none());
    }

    #[test]
    fn encodes_payloads() {
        assert_eq!(encode_ctcp("ping", "42").unwrap(), "\x01PING 42\x01");
        assert_eq!(encode_ctcp("VERSION", "").unwrap(), "\x01VERSION\x01");
        assert!(matches!(encode_ctcp("", "x"), Err(Error::InvalidCtcp)));
        assert!(matches!(encode_ctcp("A B", "x"), Err(Error::InvalidCtcp)));
        assert!(matches!(encode_ctcp("PING", "a\x01b"), Err(Error::InvalidCtcp)));
    }

    #[test]
    fn registry_defaults_and_clearing() {
        let ctcp = Ctcp::new();
        assert_eq!(ctcp.commands(), ["CLIENTINFO", "PING", "TIME", "VERSION"]);
        ctcp.clear("time");
        ctcp.set("finger", |_, _| async {});
        assert_eq!(ctcp.commands(), ["CLIENTINFO", "FINGER", "PING", "VERSION"]);
        ctcp.clear_all();
        assert!(ctcp.commands().is_empty());
    }
}
