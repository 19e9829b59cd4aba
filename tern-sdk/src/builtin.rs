//! Handlers the client registers on itself.
//!
//! They live in the internal registry, so `Caller::remove` and
//! `Caller::clear_external` never touch them. Feature toggles wipe the
//! internal registry and call [`register`] again.

use crate::client::Client;
use crate::consts::*;
use crate::event::Event;
use crate::handler::Callback;
use crate::validate;

pub(crate) fn register(client: &Client) {
    let add = |command: &str, callback: Callback| {
        client.handlers().register(true, command, callback);
    };

    add(STOPPED, Callback::inline(handle_stopped));
    add(PING, Callback::inline(handle_ping));
    add(RPL_WELCOME, Callback::inline(handle_welcome));

    if client.nick_collision_enabled() {
        add(ERR_NICKNAMEINUSE, Callback::inline(handle_nick_collision));
        add(ERR_UNAVAILRESOURCE, Callback::inline(handle_nick_collision));
    }

    if client.tracking_enabled() {
        add(JOIN, Callback::inline(handle_join));
        add(PART, Callback::inline(handle_part));
        add(KICK, Callback::inline(handle_kick));
        add(QUIT, Callback::inline(handle_quit));
        add(NICK, Callback::inline(handle_nick));
        add(RPL_NAMREPLY, Callback::inline(handle_names));
        add(RPL_TOPIC, Callback::inline(handle_topic));
        add(TOPIC, Callback::inline(handle_topic));
        add(RPL_MOTDSTART, Callback::inline(handle_motd));
        add(RPL_MOTD, Callback::inline(handle_motd));
        add(RPL_ENDOFMOTD, Callback::inline(handle_motd));
    }

    if client.cap_tracking_enabled() {
        add(RPL_MYINFO, Callback::inline(handle_myinfo));
        add(RPL_ISUPPORT, Callback::inline(handle_isupport));
        add(CAP, Callback::inline(handle_cap));
    }
}

async fn handle_stopped(client: Client, _event: Event) {
    client.cleanup(true).await;
}

async fn handle_ping(client: Client, event: Event) {
    let pong = Event {
        command: PONG.to_string(),
        params: event.params,
        trailing: event.trailing,
        ..Event::default()
    };
    if let Err(e) = client.send_unthrottled(pong).await {
        tracing::debug!("Failed to answer PING: {e}");
    }
}

async fn handle_welcome(client: Client, event: Event) {
    if let Some(nick) = event.params.first() {
        client.with_session(|s| s.nick = nick.clone());
    }
}

async fn handle_nick_collision(client: Client, event: Event) {
    // 437 is also used for channels that are temporarily unavailable.
    if event
        .params
        .get(1)
        .is_some_and(|target| validate::is_valid_channel(target))
    {
        return;
    }
    let nick = client.with_session(|s| {
        s.nick.push('_');
        s.nick.clone()
    });
    tracing::info!("Nickname in use, trying {nick}");
    if let Err(e) = client.send(Event::new(NICK, [nick])).await {
        tracing::debug!("Failed to send alternative nickname: {e}");
    }
}

/// The first argument of JOIN/PART/NICK, which older servers put in the
/// trailing position.
fn first_arg(event: &Event) -> Option<&str> {
    event
        .params
        .first()
        .map(String::as_str)
        .or(event.trailing.as_deref())
}

async fn handle_join(client: Client, event: Event) {
    let (Some(nick), Some(channel)) = (event.source_name(), first_arg(&event)) else {
        return;
    };
    client.with_session(|s| s.join(channel, nick));
}

async fn handle_part(client: Client, event: Event) {
    let (Some(nick), Some(channel)) = (event.source_name(), first_arg(&event)) else {
        return;
    };
    client.with_session(|s| s.part(channel, nick));
}

async fn handle_kick(client: Client, event: Event) {
    let [channel, nick, ..] = event.params.as_slice() else {
        return;
    };
    client.with_session(|s| s.part(channel, nick));
}

async fn handle_quit(client: Client, event: Event) {
    if let Some(nick) = event.source_name() {
        client.with_session(|s| s.quit(nick));
    }
}

async fn handle_nick(client: Client, event: Event) {
    let (Some(old), Some(new)) = (event.source_name(), first_arg(&event)) else {
        return;
    };
    client.with_session(|s| s.rename(old, new));
}

async fn handle_names(client: Client, event: Event) {
    // :server 353 me = #channel :nick1 @nick2
    let (Some(channel), Some(names)) = (event.params.last(), event.trailing.as_deref()) else {
        return;
    };
    client.with_session(|s| s.names(channel, names));
}

async fn handle_topic(client: Client, event: Event) {
    // 332 carries our nick before the channel; TOPIC does not.
    let channel = if event.command == RPL_TOPIC {
        event.params.get(1).map(String::as_str)
    } else {
        event.params.first().map(String::as_str)
    };
    let Some(channel) = channel else {
        return;
    };
    let topic = event.trailing.as_deref().unwrap_or_default();
    client.with_session(|s| s.set_topic(channel, topic));
}

async fn handle_motd(client: Client, event: Event) {
    client.with_session(|s| match event.command.as_str() {
        RPL_MOTDSTART => s.motd.clear(),
        RPL_MOTD => {
            let line = event.trailing.as_deref().unwrap_or_default();
            let line = line.strip_prefix("- ").unwrap_or(line);
            s.motd.push(line.to_string());
        }
        _ => tracing::debug!("MOTD received ({} lines)", s.motd.len()),
    });
}

async fn handle_myinfo(client: Client, event: Event) {
    // :server 004 me servername version usermodes chanmodes
    client.with_session(|s| {
        s.server_name = event.params.get(1).cloned();
        s.server_version = event.params.get(2).cloned();
    });
}

async fn handle_isupport(client: Client, event: Event) {
    // :server 005 me TOKEN TOKEN=value :are supported by this server
    let tokens = event.params.iter().skip(1).map(String::as_str);
    client.with_session(|s| s.isupport(tokens));
}

async fn handle_cap(client: Client, event: Event) {
    // :server CAP me SUBCOMMAND [*] :caps
    let Some(subcommand) = event.params.get(1) else {
        return;
    };
    let caps = event.trailing.as_deref().unwrap_or_default();

    let reply = match subcommand.to_ascii_uppercase().as_str() {
        CAP_LS => {
            let more = event.params.get(2).is_some_and(|p| p == "*");
            let wanted = client.with_session(|s| {
                for cap in caps.split_whitespace() {
                    let (name, value) = cap.split_once('=').unwrap_or((cap, ""));
                    s.caps_available.insert(name.to_string(), value.to_string());
                }
                if more || !s.cap_negotiating {
                    return None;
                }
                let wanted: Vec<&str> = client
                    .config()
                    .supported_caps
                    .iter()
                    .map(String::as_str)
                    .filter(|cap| s.caps_available.contains_key(*cap))
                    .collect();
                Some(wanted.join(" "))
            });
            match wanted {
                None => return,
                Some(wanted) if wanted.is_empty() => end_negotiation(&client),
                Some(wanted) => Event::new(CAP, [CAP_REQ]).with_trailing(wanted),
            }
        }
        CAP_ACK => {
            let negotiating = client.with_session(|s| {
                for cap in caps.split_whitespace() {
                    match cap.strip_prefix('-') {
                        Some(disabled) => s.caps_enabled.remove(disabled),
                        None => s.caps_enabled.insert(cap.to_string()),
                    };
                }
                s.cap_negotiating
            });
            if !negotiating {
                return;
            }
            end_negotiation(&client)
        }
        CAP_NAK => {
            if !client.with_session(|s| s.cap_negotiating) {
                return;
            }
            end_negotiation(&client)
        }
        CAP_NEW => {
            client.with_session(|s| {
                for cap in caps.split_whitespace() {
                    let (name, value) = cap.split_once('=').unwrap_or((cap, ""));
                    s.caps_available.insert(name.to_string(), value.to_string());
                }
            });
            return;
        }
        CAP_DEL => {
            client.with_session(|s| {
                for cap in caps.split_whitespace() {
                    s.caps_available.remove(cap);
                    s.caps_enabled.remove(cap);
                }
            });
            return;
        }
        _ => return,
    };

    if let Err(e) = client.send_unthrottled(reply).await {
        tracing::debug!("Failed to continue CAP negotiation: {e}");
    }
}

fn end_negotiation(client: &Client) -> Event {
    client.with_session(|s| s.cap_negotiating = false);
    Event::new(CAP, [CAP_END])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Config;

    fn client() -> Client {
        Client::new(Config {
            server: "irc.example.org".to_string(),
            ..Config::default()
        })
    }

    fn line(raw: &str) -> Event {
        Event::parse(raw).unwrap()
    }

    async fn feed(client: &Client, raw: &str) {
        client.run_handlers(&line(raw)).await;
    }

    #[tokio::test]
    async fn tracks_channel_membership() {
        let client = client();
        feed(&client, ":irc.example.org 001 tern :Welcome").await;
        feed(&client, ":tern!t@h JOIN #rust").await;
        feed(&client, ":irc.example.org 353 tern = #rust :@alice +bob tern").await;
        feed(&client, ":irc.example.org 332 tern #rust :Systems programming").await;
        feed(&client, ":carol!c@h JOIN :#rust").await;

        assert!(client.is_in_channel("#RUST"));
        assert_eq!(
            client.channel_users("#rust").unwrap(),
            ["alice", "bob", "carol", "tern"]
        );
        assert_eq!(
            client.channel("#rust").unwrap().topic.as_deref(),
            Some("Systems programming")
        );

        feed(&client, ":bob!b@h PART #rust :bye").await;
        feed(&client, ":alice!a@h KICK #rust carol :out").await;
        feed(&client, ":alice!a@h NICK :alicia").await;
        assert_eq!(client.channel_users("#rust").unwrap(), ["alicia", "tern"]);

        feed(&client, ":tern!t@h PART #rust").await;
        assert!(client.channels().is_empty());
    }

    #[tokio::test]
    async fn own_nick_follows_welcome_and_nick_changes() {
        let client = client();
        feed(&client, ":irc.example.org 001 tern_ :Welcome").await;
        assert_eq!(client.nick(), "tern_");
        feed(&client, ":tern_!t@h NICK tern").await;
        assert_eq!(client.nick(), "tern");
    }

    #[tokio::test]
    async fn records_motd_and_server_info() {
        let client = client();
        feed(&client, ":srv 375 tern :- srv Message of the day -").await;
        feed(&client, ":srv 372 tern :- first").await;
        feed(&client, ":srv 372 tern :- second").await;
        feed(&client, ":srv 376 tern :End of /MOTD command.").await;
        assert_eq!(client.motd(), "first\nsecond");

        feed(&client, ":srv 004 tern srv.example ircd-1.2 iow nt").await;
        feed(&client, ":srv 005 tern NETWORK=Example CHANTYPES=# :are supported").await;
        assert_eq!(client.server_name().as_deref(), Some("srv.example"));
        assert_eq!(client.server_version().as_deref(), Some("ircd-1.2"));
        assert_eq!(client.network_name().as_deref(), Some("Example"));
        assert_eq!(client.server_option("CHANTYPES").as_deref(), Some("#"));
    }

    #[tokio::test]
    async fn cap_del_and_ack_update_tables() {
        let client = client();
        feed(&client, ":srv CAP * ACK :multi-prefix server-time").await;
        assert!(client.has_capability("multi-prefix"));
        feed(&client, ":srv CAP tern DEL :server-time").await;
        assert!(!client.has_capability("server-time"));
        assert!(client.has_capability("multi-prefix"));
    }

    #[test]
    fn toggles_change_the_internal_set() {
        let client = client();
        let handlers = client.handlers();
        assert_eq!(handlers.internal_count(JOIN), 1);
        assert_eq!(handlers.internal_count(CAP), 1);
        assert_eq!(handlers.internal_count(ERR_NICKNAMEINUSE), 1);

        client.disable_cap_tracking();
        assert_eq!(handlers.internal_count(CAP), 0);
        assert_eq!(handlers.internal_count(JOIN), 1);

        client.disable_nick_collision();
        assert_eq!(handlers.internal_count(ERR_NICKNAMEINUSE), 0);

        client.disable_tracking();
        assert_eq!(handlers.internal_count(JOIN), 0);
        assert_eq!(handlers.internal_count(PING), 1);
        assert_eq!(handlers.internal_count(STOPPED), 1);
        assert!(handlers.is_empty());
    }

    #[test]
    #[should_panic(expected = "tracking was disabled")]
    fn tracking_queries_panic_when_disabled() {
        let client = client();
        client.disable_tracking();
        let _ = client.channels();
    }
}
