//! # tern-sdk
//!
//! Client runtime for IRC: one supervised connection, concurrent event
//! dispatch with a per-event join barrier, and outbound flood control.
//!
//! Start with [`Client`]: build it from a [`Config`], register handlers on
//! [`Client::handlers`], then [`Client::connect`] and [`Client::run`].

pub mod client;
pub mod consts;
pub mod ctcp;
pub mod error;
pub mod event;
pub mod handler;
pub mod rate;
pub mod state;
pub mod transport;
pub mod validate;

mod builtin;
mod codec;
mod commands;

pub use client::{Client, Config};
pub use ctcp::{CtcpEvent, decode_ctcp, encode_ctcp};
pub use error::{Error, Result};
pub use event::{Event, Source, Tags};
pub use handler::{Callback, Caller, Handler};
pub use rate::{FloodConfig, FloodPolicy, LeakyBucket, RateLimiter};
pub use state::Channel;
pub use transport::EstablishedConnection;
