//! Convenience senders for common commands. Every target is validated
//! before anything is written, and everything goes through
//! [`Client::send`], so flood control applies.

use crate::client::Client;
use crate::consts::*;
use crate::ctcp::{self, ACTION};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::validate::{
    is_valid_channel, is_valid_nick, is_valid_param, is_valid_target, is_valid_user,
};

/// WHOX fields: token, channel, user, host, nick, realname. Token 2 marks
/// replies as ours.
const WHOX_FIELDS: &str = "%tcuhnr,2";

fn check(target: &str, valid: fn(&str) -> bool) -> Result<()> {
    if valid(target) {
        Ok(())
    } else {
        Err(Error::invalid_target(target))
    }
}

fn check_param(name: &'static str, value: &str) -> Result<()> {
    if is_valid_param(value) {
        Ok(())
    } else {
        Err(Error::InvalidParam { name })
    }
}

/// Pack comma-separated targets into as few `COMMAND a,b,c` lines as fit
/// within the line limit. A target that does not fit on a line of its own
/// still gets one.
pub(crate) fn split_targets(command: &str, targets: &[&str]) -> Vec<String> {
    let budget = MAX_LINE_LENGTH.saturating_sub(command.len() + 1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for target in targets {
        if !current.is_empty() && current.len() + 1 + target.len() > budget {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(',');
        }
        current.push_str(target);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

impl Client {
    /// PRIVMSG to a channel or nickname.
    pub async fn message(&self, target: &str, text: &str) -> Result<()> {
        check(target, is_valid_target)?;
        self.send(Event::new(PRIVMSG, [target]).with_trailing(text))
            .await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        check(target, is_valid_target)?;
        self.send(Event::new(NOTICE, [target]).with_trailing(text))
            .await
    }

    /// `/me` style message.
    pub async fn action(&self, target: &str, text: &str) -> Result<()> {
        self.send_ctcp(target, ACTION, text).await
    }

    pub async fn send_ctcp(&self, target: &str, command: &str, text: &str) -> Result<()> {
        check(target, is_valid_target)?;
        let payload = ctcp::encode_ctcp(command, text)?;
        self.send(Event::new(PRIVMSG, [target]).with_trailing(payload))
            .await
    }

    pub async fn send_ctcp_reply(&self, target: &str, command: &str, text: &str) -> Result<()> {
        check(target, is_valid_target)?;
        let payload = ctcp::encode_ctcp(command, text)?;
        self.send(Event::new(NOTICE, [target]).with_trailing(payload))
            .await
    }

    /// Join one or more channels, splitting across lines when needed.
    pub async fn join(&self, channels: &[&str]) -> Result<()> {
        self.send_split(JOIN, channels, is_valid_channel).await
    }

    pub async fn join_key(&self, channel: &str, key: &str) -> Result<()> {
        check(channel, is_valid_channel)?;
        check_param("channel key", key)?;
        self.send(Event::new(JOIN, [channel, key]).sensitive())
            .await
    }

    /// Leave one or more channels.
    pub async fn part(&self, channels: &[&str]) -> Result<()> {
        self.send_split(PART, channels, is_valid_channel).await
    }

    pub async fn part_message(&self, channel: &str, message: &str) -> Result<()> {
        check(channel, is_valid_channel)?;
        self.send(Event::new(PART, [channel]).with_trailing(message))
            .await
    }

    /// Set the topic. An empty `topic` clears it.
    pub async fn topic(&self, channel: &str, topic: &str) -> Result<()> {
        check(channel, is_valid_channel)?;
        self.send(Event::new(TOPIC, [channel]).with_trailing(topic))
            .await
    }

    pub async fn who(&self, target: &str) -> Result<()> {
        check(target, is_valid_target)?;
        self.send(Event::new(WHO, [target, WHOX_FIELDS])).await
    }

    pub async fn whois(&self, nick: &str) -> Result<()> {
        check(nick, is_valid_nick)?;
        self.send(Event::new(WHOIS, [nick])).await
    }

    /// Ask about a nick that has left. `amount` of 0 lets the server decide.
    pub async fn whowas(&self, nick: &str, amount: u32) -> Result<()> {
        check(nick, is_valid_nick)?;
        let mut event = Event::new(WHOWAS, [nick]);
        if amount > 0 {
            event.params.push(amount.to_string());
        }
        self.send(event).await
    }

    pub async fn ping(&self, id: &str) -> Result<()> {
        check_param("ping token", id)?;
        self.send(Event::new(PING, [id])).await
    }

    pub async fn pong(&self, id: &str) -> Result<()> {
        check_param("pong token", id)?;
        self.send(Event::new(PONG, [id])).await
    }

    /// Authenticate as an operator. Never logged.
    pub async fn oper(&self, user: &str, password: &str) -> Result<()> {
        check(user, is_valid_user)?;
        check_param("password", password)?;
        self.send(Event::new(OPER, [user, password]).sensitive())
            .await
    }

    /// Kick `nick` from `channel`. An empty `reason` sends none.
    pub async fn kick(&self, channel: &str, nick: &str, reason: &str) -> Result<()> {
        check(channel, is_valid_channel)?;
        check(nick, is_valid_nick)?;
        let mut event = Event::new(KICK, [channel, nick]);
        if !reason.is_empty() {
            event = event.with_trailing(reason);
        }
        self.send(event).await
    }

    /// Invite each of `nicks` to `channel`.
    pub async fn invite(&self, channel: &str, nicks: &[&str]) -> Result<()> {
        check(channel, is_valid_channel)?;
        for nick in nicks {
            check(nick, is_valid_nick)?;
        }
        for nick in nicks {
            self.send(Event::new(INVITE, [*nick, channel])).await?;
        }
        Ok(())
    }

    pub async fn away(&self, reason: &str) -> Result<()> {
        self.send(Event::new(AWAY, Vec::<String>::new()).with_trailing(reason))
            .await
    }

    pub async fn back(&self) -> Result<()> {
        self.send(Event::new(AWAY, Vec::<String>::new())).await
    }

    /// LIST the given channels, or every channel when `channels` is empty.
    pub async fn list(&self, channels: &[&str]) -> Result<()> {
        if channels.is_empty() {
            return self.send(Event::new(LIST, Vec::<String>::new())).await;
        }
        self.send_split(LIST, channels, is_valid_channel).await
    }

    /// Request a nickname change. Tracked state follows once the server
    /// confirms it.
    pub async fn set_nick(&self, nick: &str) -> Result<()> {
        check(nick, is_valid_nick)?;
        self.send(Event::new(NICK, [nick])).await
    }

    /// Parse a raw protocol line and send it.
    pub async fn send_raw(&self, line: &str) -> Result<()> {
        let event = Event::parse(line)
            .ok_or_else(|| Error::InvalidEvent(format!("cannot parse {line:?}")))?;
        self.send(event).await
    }

    async fn send_split(
        &self,
        command: &str,
        targets: &[&str],
        valid: fn(&str) -> bool,
    ) -> Result<()> {
        for target in targets {
            check(target, valid)?;
        }
        for line in split_targets(command, targets) {
            self.send(Event::new(command, [line])).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Config;
    use crate::transport::EstablishedConnection;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    async fn connected() -> (Client, BufReader<DuplexStream>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let client = Client::new(Config {
            server: "irc.example.org".to_string(),
            allow_flood: true,
            ..Config::default()
        });
        client.disable_cap_tracking();
        client.set_stream(EstablishedConnection::stream(local));
        client.connect().await.unwrap();
        let mut server = BufReader::new(remote);
        for _ in 0..2 {
            next_line(&mut server).await;
        }
        (client, server)
    }

    async fn next_line(server: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[test]
    fn split_never_drops_targets() {
        let channels: Vec<String> = (0..60).map(|i| format!("#channel-{i:03}")).collect();
        let refs: Vec<&str> = channels.iter().map(String::as_str).collect();
        let lines = split_targets(JOIN, &refs);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(JOIN.len() + 1 + line.len() <= MAX_LINE_LENGTH);
        }
        let rejoined: Vec<&str> = lines.iter().flat_map(|l| l.split(',')).collect();
        assert_eq!(rejoined, refs);
    }

    #[test]
    fn split_keeps_small_sets_on_one_line() {
        assert_eq!(split_targets(JOIN, &["#a", "#b"]), ["#a,#b"]);
        assert!(split_targets(JOIN, &[]).is_empty());
    }

    #[tokio::test]
    async fn invalid_targets_send_nothing() {
        let (client, _server) = connected().await;
        let err = client.message("bad target", "hi").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTarget { target } if target == "bad target"));
        assert!(client.join(&["#ok", "nope"]).await.is_err());
        assert!(client.kick("#ok", "1nick", "").await.is_err());
        assert!(client.whois("#chan").await.is_err());
    }

    #[tokio::test]
    async fn free_form_params_cannot_split_into_more_params() {
        let (client, mut server) = connected().await;
        assert!(matches!(
            client.ping("a b").await,
            Err(Error::InvalidParam { name: "ping token" })
        ));
        assert!(client.pong(":x").await.is_err());
        assert!(client.join_key("#a", "two words").await.is_err());
        let err = client.oper("admin", "pass word").await.unwrap_err();
        assert!(!err.to_string().contains("pass word"));

        client.ping("12345").await.unwrap();
        assert_eq!(next_line(&mut server).await, "PING 12345");
        client.join_key("#a", "sekrit").await.unwrap();
        assert_eq!(next_line(&mut server).await, "JOIN #a sekrit");
    }

    #[tokio::test]
    async fn commands_produce_expected_lines() {
        let (client, mut server) = connected().await;

        client.message("#rust", "hello there").await.unwrap();
        assert_eq!(next_line(&mut server).await, "PRIVMSG #rust :hello there");

        client.action("#rust", "waves").await.unwrap();
        assert_eq!(next_line(&mut server).await, "PRIVMSG #rust :\x01ACTION waves\x01");

        client.part(&["#rust"]).await.unwrap();
        assert_eq!(next_line(&mut server).await, "PART #rust");

        client.part_message("#rust", "later").await.unwrap();
        assert_eq!(next_line(&mut server).await, "PART #rust :later");

        client.join(&["#a", "#b"]).await.unwrap();
        assert_eq!(next_line(&mut server).await, "JOIN #a,#b");

        client.who("#a").await.unwrap();
        assert_eq!(next_line(&mut server).await, "WHO #a %tcuhnr,2");

        client.kick("#a", "bob", "").await.unwrap();
        assert_eq!(next_line(&mut server).await, "KICK #a bob");

        client.invite("#a", &["bob", "carol"]).await.unwrap();
        assert_eq!(next_line(&mut server).await, "INVITE bob #a");
        assert_eq!(next_line(&mut server).await, "INVITE carol #a");

        client.away("lunch").await.unwrap();
        assert_eq!(next_line(&mut server).await, "AWAY :lunch");
        client.back().await.unwrap();
        assert_eq!(next_line(&mut server).await, "AWAY");

        client.list(&[]).await.unwrap();
        assert_eq!(next_line(&mut server).await, "LIST");

        client.whowas("bob", 3).await.unwrap();
        assert_eq!(next_line(&mut server).await, "WHOWAS bob 3");

        client.send_raw("mode #a +o bob").await.unwrap();
        assert_eq!(next_line(&mut server).await, "MODE #a +o bob");
    }
}
