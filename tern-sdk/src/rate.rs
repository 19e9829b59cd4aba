//! Outbound flood control.
//!
//! Each session owns a [`RateLimiter`]. Before an event is written, `send()`
//! asks it how long to wait given the event's serialized length. The policy
//! is pluggable through [`FloodPolicy`]; the default is a [`LeakyBucket`]
//! where every line costs a fixed amount plus a per-byte amount of "send
//! time", and lines are only delayed once the accumulated backlog exceeds
//! the burst allowance.
//!
//! Flood control can be switched off for the whole client with
//! [`Config::allow_flood`](crate::Config::allow_flood), or skipped for a
//! single event with [`Client::send_unthrottled`](crate::Client::send_unthrottled).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Computes how long to hold back a line of `len` bytes sent at `now`.
///
/// Implementations are stateful and are called once per outbound event, so
/// the returned delay may also be recorded as consumed budget.
pub trait FloodPolicy: Send + Sync + fmt::Debug {
    fn delay_for(&mut self, len: usize, now: Instant) -> Duration;
}

/// Builds a fresh policy for every new session.
pub type FloodPolicyFactory = Arc<dyn Fn() -> Box<dyn FloodPolicy> + Send + Sync>;

/// Parameters of the default leaky bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodConfig {
    /// Cost of any line regardless of size.
    pub line_cost: Duration,
    /// Additional cost per serialized byte.
    pub byte_cost: Duration,
    /// Backlog tolerated before lines start being delayed.
    pub burst: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            line_cost: Duration::from_secs(1),
            byte_cost: Duration::from_millis(10),
            burst: Duration::from_secs(8),
        }
    }
}

/// Leaky bucket tracked as a "theoretical drain time": the instant at which
/// everything sent so far would have drained at one second of cost per
/// second of wall time.
#[derive(Debug)]
pub struct LeakyBucket {
    config: FloodConfig,
    drained_at: Option<Instant>,
}

impl LeakyBucket {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            config,
            drained_at: None,
        }
    }

    fn cost(&self, len: usize) -> Duration {
        let bytes = u32::try_from(len).unwrap_or(u32::MAX);
        self.config.line_cost + self.config.byte_cost.saturating_mul(bytes)
    }
}

impl FloodPolicy for LeakyBucket {
    fn delay_for(&mut self, len: usize, now: Instant) -> Duration {
        let start = match self.drained_at {
            Some(drained_at) if drained_at > now => drained_at,
            _ => now,
        };
        let drained_at = start + self.cost(len);
        self.drained_at = Some(drained_at);

        let backlog = drained_at.saturating_duration_since(now);
        backlog.saturating_sub(self.config.burst)
    }
}

/// Per-session limiter wrapping the configured policy.
#[derive(Debug)]
pub struct RateLimiter {
    policy: Box<dyn FloodPolicy>,
}

impl RateLimiter {
    pub fn new(policy: Box<dyn FloodPolicy>) -> Self {
        Self { policy }
    }

    pub fn delay_for(&mut self, len: usize) -> Duration {
        self.policy.delay_for(len, Instant::now())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Box::new(LeakyBucket::new(FloodConfig::default())))
    }
}
