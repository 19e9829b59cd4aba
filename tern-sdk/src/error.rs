//! Error type shared by every fallible SDK operation.

use std::time::Duration;

/// Result alias used throughout the SDK.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything the runtime can fail with.
///
/// Configuration and validation errors are returned synchronously and are
/// never retried. Transport and decode failures seen by the read loop feed
/// the reconnect loop instead; only once that gives up does an error reach
/// the callback installed with [`Client::on_error`](crate::Client::on_error).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server, port, nickname or username failed validation in `connect()`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A channel, nickname or user passed to a command builder is not valid.
    #[error("invalid target: {target}")]
    InvalidTarget { target: String },

    /// A key, token or password would not survive as a single middle
    /// parameter. The value itself is left out of the message.
    #[error("invalid {name}: must be non-empty without spaces or a leading ':'")]
    InvalidParam { name: &'static str },

    /// An event could not be built or written (e.g. embedded CR/LF).
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A CTCP command was empty or contained forbidden characters.
    #[error("invalid CTCP")]
    InvalidCtcp,

    /// A status query was made while no session is active.
    #[error("client is not connected to server")]
    NotConnected,

    /// `reconnect()` was called while another reconnect was running.
    #[error("a reconnect attempt is already in progress")]
    ReconnectInProgress,

    /// The connection dropped and no reconnect was attempted.
    #[error("unexpectedly disconnected")]
    Disconnected,

    /// The server closed the stream, or the writer has been torn down.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing was read from the server within the read deadline.
    #[error("no data from server within {0:?}")]
    ReadTimeout(Duration),

    /// The serialized event exceeds the protocol line limit.
    #[error("line is {len} bytes, maximum is {max}")]
    LineTooLong { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TLS server name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),
}

impl Error {
    pub(crate) fn invalid_target(target: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
        }
    }

    /// Whether the reconnect loop should give up immediately on this error.
    pub(crate) fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }
}
