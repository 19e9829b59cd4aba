//! Protocol verbs, numerics and the client's virtual event names.

/// Registry key matching every event, dispatched alongside the
/// command-specific handlers.
pub const ALL_EVENTS: &str = "*";

// Virtual events. These are generated by the client and never sent.

/// The transport is open and the session-opening commands are about to go out.
pub const INITIALIZED: &str = "CLIENT_INITIALIZED";
/// The session was torn down by `quit()` or `stop()`.
pub const DISCONNECTED: &str = "CLIENT_DISCONNECTED";
/// `stop()` was called; `run()` returns once this is dispatched.
pub const STOPPED: &str = "CLIENT_STOPPED";

/// Longest line (without CRLF) a server is required to accept.
pub const MAX_LINE_LENGTH: usize = 510;
/// Upper bound for the IRCv3 tag section of an inbound line.
pub const MAX_TAGS_LENGTH: usize = 8191;

pub const AWAY: &str = "AWAY";
pub const CAP: &str = "CAP";
pub const INVITE: &str = "INVITE";
pub const JOIN: &str = "JOIN";
pub const KICK: &str = "KICK";
pub const LIST: &str = "LIST";
pub const NICK: &str = "NICK";
pub const NOTICE: &str = "NOTICE";
pub const OPER: &str = "OPER";
pub const PART: &str = "PART";
pub const PASS: &str = "PASS";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const PRIVMSG: &str = "PRIVMSG";
pub const QUIT: &str = "QUIT";
pub const TOPIC: &str = "TOPIC";
pub const USER: &str = "USER";
pub const WHO: &str = "WHO";
pub const WHOIS: &str = "WHOIS";
pub const WHOWAS: &str = "WHOWAS";

pub const RPL_WELCOME: &str = "001";
pub const RPL_MYINFO: &str = "004";
pub const RPL_ISUPPORT: &str = "005";
pub const RPL_TOPIC: &str = "332";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_MOTD: &str = "372";
pub const RPL_MOTDSTART: &str = "375";
pub const RPL_ENDOFMOTD: &str = "376";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_UNAVAILRESOURCE: &str = "437";

// CAP subcommands.
pub const CAP_LS: &str = "LS";
pub const CAP_REQ: &str = "REQ";
pub const CAP_ACK: &str = "ACK";
pub const CAP_NAK: &str = "NAK";
pub const CAP_NEW: &str = "NEW";
pub const CAP_DEL: &str = "DEL";
pub const CAP_END: &str = "END";
