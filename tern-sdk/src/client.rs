//! The connection supervisor.
//!
//! A [`Client`] owns one configuration, one session (replaced on every
//! connect), the handler registry and the CTCP registry. `connect()` opens a
//! transport, registers with the server and starts two background tasks:
//!
//! - the **read loop** decodes lines into [`Event`]s and pushes them onto a
//!   bounded queue (producers wait when it is full);
//! - the **dispatch loop** takes one event at a time off the queue and runs
//!   every matching handler, waiting for all of them before taking the next.
//!
//! When the read loop fails (EOF, I/O error, read timeout) it reconnects
//! using the configured delay and retry count. If that gives up, the error
//! goes to the callback installed with [`Client::on_error`] and [`Client::run`]
//! returns it.
//!
//! ```no_run
//! # async fn demo() -> tern_sdk::Result<()> {
//! use tern_sdk::{Client, Config};
//!
//! let client = Client::new(Config {
//!     server: "irc.libera.chat".into(),
//!     port: 6697,
//!     nick: "ternbot".into(),
//!     ..Config::default()
//! });
//! client.handlers().add("PRIVMSG", |client, event| async move {
//!     if event.last() == Some("!ping") {
//!         let _ = client.message(&event.params[0], "pong").await;
//!     }
//! });
//! client.connect().await?;
//! client.run().await
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::builtin;
use crate::codec::{Decoder, Encoder};
use crate::consts::{CAP, DISCONNECTED, INITIALIZED, NICK, PASS, QUIT, STOPPED, USER};
use crate::ctcp::{self, Ctcp};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::handler::Caller;
use crate::rate::{FloodConfig, FloodPolicy, FloodPolicyFactory, LeakyBucket, RateLimiter};
use crate::state::Session;
use crate::transport::{self, EstablishedConnection};
use crate::validate;

/// Capacity of the queue between the read loop and the dispatch loop.
const EVENT_QUEUE_CAPACITY: usize = 100;
/// Reconnect delays shorter than this are replaced with [`DEFAULT_RECONNECT_DELAY`].
const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(25);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);
/// Upper bound on sending QUIT and closing the writer during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_PORT: u32 = 21;
const MAX_PORT: u32 = 65535;

/// Client configuration. Immutable once the client is built, apart from the
/// feature toggles on [`Client`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or IP address.
    pub server: String,
    /// Kept wider than `u16` so out-of-range values are rejected by
    /// `connect()` instead of being unrepresentable.
    pub port: u32,
    /// Server password, sent as PASS before registration.
    pub password: Option<String>,
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub name: String,
    /// Use TLS. Implied when `port` is 6697.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    /// How many times the read loop retries a failed reconnect. With 0 a
    /// dropped connection is reported instead of retried.
    pub retries: u32,
    /// Wait before each reconnect attempt. Values under 10s are replaced
    /// with 25s.
    pub reconnect_delay: Duration,
    /// A connection that stays silent this long is treated as dead.
    pub read_timeout: Duration,
    /// Disable flood control entirely.
    pub allow_flood: bool,
    /// Parameters of the default flood policy.
    pub flood: FloodConfig,
    /// Capabilities requested during CAP negotiation when the server offers
    /// them.
    pub supported_caps: Vec<String>,
    /// Reply to CTCP VERSION.
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 6667,
            password: None,
            nick: "tern".to_string(),
            user: "tern".to_string(),
            name: "tern".to_string(),
            tls: false,
            tls_insecure: false,
            retries: 3,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            allow_flood: false,
            flood: FloodConfig::default(),
            supported_caps: vec!["multi-prefix".to_string(), "server-time".to_string()],
            version: concat!("tern-sdk ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// `host:port`, as used in logs and virtual events.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::InvalidConfig("server is empty".to_string()));
        }
        if !(MIN_PORT..=MAX_PORT).contains(&self.port) {
            return Err(Error::InvalidConfig(format!(
                "port {} is outside {MIN_PORT}..={MAX_PORT}",
                self.port
            )));
        }
        if !validate::is_valid_nick(&self.nick) {
            return Err(Error::InvalidConfig(format!("invalid nickname {:?}", self.nick)));
        }
        if !validate::is_valid_user(&self.user) {
            return Err(Error::InvalidConfig(format!("invalid username {:?}", self.user)));
        }
        Ok(())
    }

    fn effective_reconnect_delay(&self) -> Duration {
        if self.reconnect_delay < MIN_RECONNECT_DELAY {
            DEFAULT_RECONNECT_DELAY
        } else {
            self.reconnect_delay
        }
    }
}

type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Default)]
struct Features {
    tracking_disabled: AtomicBool,
    cap_tracking_disabled: AtomicBool,
    nick_collision_disabled: AtomicBool,
}

/// Cancellation tokens of the running background tasks.
struct Tasks {
    read: CancellationToken,
    exec: CancellationToken,
}

struct Inner {
    config: Config,
    features: Features,
    state: RwLock<Session>,
    /// Serializes connect against cleanup.
    lifecycle: tokio::sync::Mutex<()>,
    caller: Caller,
    ctcp: Ctcp,
    events_tx: mpsc::Sender<Event>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    tries: AtomicU32,
    reconnecting: AtomicBool,
    tasks: Mutex<Option<Tasks>>,
    /// Cancelled when [`Client::run`] should return.
    run_token: Mutex<CancellationToken>,
    fatal: Mutex<Option<Error>>,
    error_hook: RwLock<Option<ErrorHook>>,
    pending_stream: Mutex<Option<EstablishedConnection>>,
    flood_policy: RwLock<FloodPolicyFactory>,
    created_at: Instant,
}

/// A handle to the client. Cheap to clone; every clone drives the same
/// connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.inner.config.server_addr())
            .field("connected", &self.is_connected())
            .field("handlers", &self.inner.caller)
            .finish()
    }
}

/// Clears the single-flight reconnect flag however the attempt ends.
struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Client {
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let flood = config.flood;
        let flood_policy: FloodPolicyFactory =
            Arc::new(move || Box::new(LeakyBucket::new(flood)) as Box<dyn FloodPolicy>);
        let session = Session::new(&config.nick, RateLimiter::new(flood_policy()));

        let client = Self {
            inner: Arc::new(Inner {
                config,
                features: Features::default(),
                state: RwLock::new(session),
                lifecycle: tokio::sync::Mutex::new(()),
                caller: Caller::new(),
                ctcp: Ctcp::new(),
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                tries: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                tasks: Mutex::new(None),
                run_token: Mutex::new(CancellationToken::new()),
                fatal: Mutex::new(None),
                error_hook: RwLock::new(None),
                pending_stream: Mutex::new(None),
                flood_policy: RwLock::new(flood_policy),
                created_at: Instant::now(),
            }),
        };
        builtin::register(&client);
        client
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The handler registry. Registrations survive reconnects.
    pub fn handlers(&self) -> &Caller {
        &self.inner.caller
    }

    /// Handlers for CTCP requests.
    pub fn ctcp(&self) -> &Ctcp {
        &self.inner.ctcp
    }

    /// Use `stream` instead of dialing the server on the next `connect()`.
    /// Later reconnects dial normally.
    pub fn set_stream(&self, stream: EstablishedConnection) {
        *self.inner.pending_stream.lock() = Some(stream);
    }

    /// Called once when the read loop fails and reconnecting gives up.
    pub fn on_error(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        *self.inner.error_hook.write() = Some(Arc::new(hook));
    }

    /// Replace the flood policy for sessions started after this call.
    pub fn set_flood_policy(
        &self,
        factory: impl Fn() -> Box<dyn FloodPolicy> + Send + Sync + 'static,
    ) {
        *self.inner.flood_policy.write() = Arc::new(factory);
    }

    pub(crate) fn session(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.state.read()
    }

    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        f(&mut self.inner.state.write())
    }

    // ── Feature toggles ──────────────────────────────────────────────

    pub(crate) fn tracking_enabled(&self) -> bool {
        !self.inner.features.tracking_disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn cap_tracking_enabled(&self) -> bool {
        self.tracking_enabled()
            && !self
                .inner
                .features
                .cap_tracking_disabled
                .load(Ordering::SeqCst)
    }

    pub(crate) fn nick_collision_enabled(&self) -> bool {
        !self
            .inner
            .features
            .nick_collision_disabled
            .load(Ordering::SeqCst)
    }

    /// Stop tracking channels, users, MOTD, server options and
    /// capabilities. Also disables CAP negotiation. Cannot be undone; the
    /// tracking queries panic afterwards.
    pub fn disable_tracking(&self) {
        self.toggle(&self.inner.features.tracking_disabled, "tracking");
    }

    /// Stop CAP negotiation and server option tracking. Cannot be undone.
    pub fn disable_cap_tracking(&self) {
        self.toggle(&self.inner.features.cap_tracking_disabled, "capability tracking");
    }

    /// Stop answering 433/437 with an alternative nickname. Cannot be undone.
    pub fn disable_nick_collision(&self) {
        self.toggle(
            &self.inner.features.nick_collision_disabled,
            "nick collision handling",
        );
    }

    fn toggle(&self, flag: &AtomicBool, feature: &str) {
        if flag.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disabling {feature}");
        self.inner.caller.clear_internal();
        builtin::register(self);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect and register with the server, then start the read and
    /// dispatch loops. Any previous session is torn down first.
    pub async fn connect(&self) -> Result<()> {
        let config = &self.inner.config;
        config.validate()?;

        let lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(&lifecycle, false).await;

        let addr = config.server_addr();
        tracing::info!("Connecting to {addr}");

        let flood_policy = self.inner.flood_policy.read().clone();
        *self.inner.state.write() = Session::new(&config.nick, RateLimiter::new(flood_policy()));

        let pending = self.inner.pending_stream.lock().take();
        let conn = match pending {
            Some(conn) => conn,
            None => transport::establish_connection(config).await?,
        };
        let (reader, writer) = conn.into_split();
        let decoder = Decoder::new(reader);
        let encoder = Arc::new(tokio::sync::Mutex::new(Encoder::new(writer)));
        self.inner.state.write().encoder = Some(encoder);

        if self.inner.events_tx.try_send(lifecycle_event(INITIALIZED, addr.clone())).is_err() {
            tracing::warn!("Event queue full, dropping {INITIALIZED}");
        }

        if let Err(e) = self.register_session().await {
            self.inner.state.write().encoder = None;
            return Err(e);
        }

        let now = Instant::now();
        {
            let mut state = self.inner.state.write();
            state.connected = true;
            state.connect_time = Some(Utc::now());
            state.connected_at = Some(now);
        }
        self.inner.tries.store(0, Ordering::SeqCst);

        {
            let mut run_token = self.inner.run_token.lock();
            if run_token.is_cancelled() {
                *run_token = CancellationToken::new();
                *self.inner.fatal.lock() = None;
            }
        }

        self.spawn_tasks(decoder);
        tracing::info!("Connected to {addr}");
        Ok(())
    }

    /// Opening messages: PASS, CAP LS, NICK, USER. Written directly,
    /// without flood control.
    async fn register_session(&self) -> Result<()> {
        let config = &self.inner.config;
        if let Some(password) = &config.password {
            self.write(&Event::new(PASS, [password.as_str()]).sensitive())
                .await?;
        }
        if self.cap_tracking_enabled() {
            self.with_session(|s| s.cap_negotiating = true);
            self.write(&Event::new(CAP, ["LS", "302"])).await?;
        }
        self.write(&Event::new(NICK, [config.nick.as_str()])).await?;
        let user = Event::new(USER, [config.user.as_str(), "*", "*"]).with_trailing(config.name.as_str());
        self.write(&user).await?;
        Ok(())
    }

    fn spawn_tasks(&self, decoder: Decoder) {
        let tasks = Tasks {
            read: CancellationToken::new(),
            exec: CancellationToken::new(),
        };
        tokio::spawn(self.clone().read_loop(decoder, tasks.read.clone()));
        tokio::spawn(self.clone().exec_loop(tasks.exec.clone()));
        *self.inner.tasks.lock() = Some(tasks);
    }

    /// Tear down the current session and connect again, bypassing the retry
    /// count for the first attempt. Fails with
    /// [`Error::ReconnectInProgress`] if a reconnect is already running.
    pub async fn reconnect(&self) -> Result<()> {
        self.reconnect_inner(true).await
    }

    fn reconnect_inner(&self, remote: bool) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self
                .inner
                .reconnecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(Error::ReconnectInProgress);
            }
            let _guard = ReconnectGuard(&self.inner.reconnecting);

            self.cleanup(false).await;

            let retries = self.inner.config.retries;
            if retries < 1 && !remote {
                return Err(Error::Disconnected);
            }

            let delay = self.inner.config.effective_reconnect_delay();
            let stop = self.inner.run_token.lock().clone();
            let watch_stop = !stop.is_cancelled();

            let mut result = self.connect_after(delay, &stop, watch_stop).await;
            while let Err(e) = &result {
                if e.is_permanent() || self.inner.tries.load(Ordering::SeqCst) >= retries {
                    break;
                }
                let attempt = self.inner.tries.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    retries,
                    delay_secs = delay.as_secs(),
                    "Reconnect failed, retrying"
                );
                result = self.connect_after(delay, &stop, watch_stop).await;
            }

            if let Err(e) = &result {
                tracing::error!(error = %e, "Giving up on reconnecting");
                self.cleanup(false).await;
            }
            result
        })
    }

    async fn connect_after(
        &self,
        delay: Duration,
        stop: &CancellationToken,
        watch_stop: bool,
    ) -> Result<()> {
        tracing::info!(delay_secs = delay.as_secs(), "Reconnecting to {}", self.server());
        tokio::select! {
            _ = stop.cancelled(), if watch_stop => return Err(Error::Disconnected),
            _ = tokio::time::sleep(delay) => {}
        }
        self.connect().await
    }

    /// Block until [`Client::stop`] is called or reconnecting gives up. In
    /// the latter case the error that ended it is returned.
    pub async fn run(&self) -> Result<()> {
        let token = self.inner.run_token.lock().clone();
        token.cancelled().await;
        match self.inner.fatal.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Disconnect, optionally sending QUIT first. Dispatches
    /// `CLIENT_DISCONNECTED` but leaves [`Client::run`] waiting.
    pub async fn quit(&self, send: bool) {
        self.quit_inner(send.then_some("disconnecting...")).await;
    }

    pub async fn quit_with_message(&self, message: &str) {
        self.quit_inner(Some(message)).await;
    }

    async fn quit_inner(&self, message: Option<&str>) {
        if let Some(tasks) = self.inner.tasks.lock().as_ref() {
            tasks.read.cancel();
        }
        if let Some(message) = message {
            let quit = Event::new(QUIT, Vec::<String>::new()).with_trailing(message);
            match tokio::time::timeout(CLOSE_TIMEOUT, self.write(&quit)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("QUIT not sent: {e}"),
                Err(_) => tracing::debug!("QUIT not sent: writer stalled"),
            }
        }
        self.run_handlers(&lifecycle_event(DISCONNECTED, self.server()))
            .await;
        self.cleanup(false).await;
    }

    /// Disconnect and release [`Client::run`].
    pub async fn stop(&self) {
        self.quit(false).await;
        self.stopped().await;
    }

    /// Like [`Client::stop`], sending QUIT with `message` first.
    pub async fn stop_with_message(&self, message: &str) {
        self.quit_inner(Some(message)).await;
        self.stopped().await;
    }

    async fn stopped(&self) {
        self.run_handlers(&lifecycle_event(STOPPED, self.server()))
            .await;
    }

    /// Close the transport and cancel the background tasks. With `all`,
    /// also release [`Client::run`]. Safe to call when nothing is connected.
    pub(crate) async fn cleanup(&self, all: bool) {
        let lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(&lifecycle, all).await;
    }

    /// Body of [`Client::cleanup`]; the caller holds the lifecycle lock.
    async fn teardown(&self, _lifecycle: &tokio::sync::MutexGuard<'_, ()>, all: bool) {
        if let Some(tasks) = self.inner.tasks.lock().take() {
            tasks.read.cancel();
            tasks.exec.cancel();
        }
        let encoder = {
            let mut state = self.inner.state.write();
            state.connected = false;
            state.closing.cancel();
            state.encoder.take()
        };
        if let Some(encoder) = encoder {
            tracing::info!("Closing connection to {}", self.server());
            let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
                encoder.lock().await.shutdown().await;
            })
            .await;
            if closed.is_err() {
                tracing::warn!("Timed out closing connection to {}", self.server());
            }
        }
        if all {
            self.inner.run_token.lock().cancel();
        }
    }

    /// Report a failure the read loop could not recover from.
    fn fail(&self, error: Error) {
        let run_token = self.inner.run_token.lock().clone();
        if run_token.is_cancelled() {
            tracing::debug!("Ignoring error after stop: {error}");
            return;
        }
        tracing::error!(error = %error, "Connection lost");
        let hook = self.inner.error_hook.read().clone();
        if let Some(hook) = hook {
            hook(&error);
        }
        *self.inner.fatal.lock() = Some(error);
        run_token.cancel();
    }

    // ── Background tasks ─────────────────────────────────────────────

    async fn read_loop(self, mut decoder: Decoder, token: CancellationToken) {
        let read_timeout = self.inner.config.read_timeout;
        let error = loop {
            let decoded = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                decoded = tokio::time::timeout(read_timeout, decoder.decode()) => decoded,
            };
            let event = match decoded {
                Ok(Ok(Some(event))) => event,
                Ok(Ok(None)) => break Error::ConnectionClosed,
                Ok(Err(e)) => break e,
                Err(_) => break Error::ReadTimeout(read_timeout),
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                sent = self.inner.events_tx.send(event) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        };
        drop(decoder);

        if token.is_cancelled() {
            return;
        }
        tracing::warn!(error = %error, "Read loop failed");
        match self.reconnect_inner(false).await {
            Ok(()) | Err(Error::ReconnectInProgress) => {}
            Err(e) => self.fail(e),
        }
    }

    async fn exec_loop(self, token: CancellationToken) {
        let mut rx = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            rx = self.inner.events_rx.lock() => rx,
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            self.run_handlers(&event).await;
        }
    }

    pub(crate) async fn run_handlers(&self, event: &Event) {
        if !event.sensitive {
            tracing::debug!("< {}", event.stripped());
        }
        self.inner.caller.execute(&event.command, self, event).await;
        if let Some(request) = ctcp::decode_ctcp(event) {
            self.inner.ctcp.call(self, request).await;
        }
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Send an event, waiting out the flood-control delay first unless
    /// `allow_flood` is set.
    pub async fn send(&self, event: Event) -> Result<()> {
        if !self.inner.config.allow_flood {
            let delay = self.inner.state.write().rate.delay_for(event.serialized_len());
            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Throttling {}", event.command);
                tokio::time::sleep(delay).await;
            }
        }
        self.write(&event).await
    }

    /// Send an event immediately, bypassing flood control.
    pub async fn send_unthrottled(&self, event: Event) -> Result<()> {
        self.write(&event).await
    }

    async fn write(&self, event: &Event) -> Result<()> {
        let (encoder, closing) = {
            let mut state = self.inner.state.write();
            state.last_write = Some(Instant::now());
            (state.encoder.clone(), state.closing.clone())
        };
        let encoder = encoder.ok_or(Error::ConnectionClosed)?;

        if !event.sensitive {
            tracing::debug!("> {}", event.stripped());
        }
        tokio::select! {
            biased;
            _ = closing.cancelled() => Err(Error::ConnectionClosed),
            written = async { encoder.lock().await.encode(event).await } => written,
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.inner.state.read().connected
    }

    /// When the current session was established.
    pub fn uptime(&self) -> Result<DateTime<Utc>> {
        let state = self.inner.state.read();
        match (state.connected, state.connect_time) {
            (true, Some(time)) => Ok(time),
            _ => Err(Error::NotConnected),
        }
    }

    /// How long the current session has been up.
    pub fn connection_duration(&self) -> Result<Duration> {
        let state = self.inner.state.read();
        match (state.connected, state.connected_at) {
            (true, Some(at)) => Ok(at.elapsed()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Time since anything was last written to the server.
    pub fn idle(&self) -> Result<Duration> {
        let state = self.inner.state.read();
        match (state.connected, state.last_write) {
            (true, Some(at)) => Ok(at.elapsed()),
            _ => Err(Error::NotConnected),
        }
    }

    /// `host:port` of the configured server.
    pub fn server(&self) -> String {
        self.inner.config.server_addr()
    }

    /// Time since this client was created.
    pub fn lifetime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }
}

/// Virtual events carry the server address as their trailing argument.
fn lifecycle_event(command: &str, addr: String) -> Event {
    Event::new(command, Vec::<String>::new()).with_trailing(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn config() -> Config {
        Config {
            server: "irc.example.org".to_string(),
            ..Config::default()
        }
    }

    async fn connected(config: Config) -> (Client, BufReader<DuplexStream>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let client = Client::new(config);
        client.disable_cap_tracking();
        client.set_stream(EstablishedConnection::stream(local));
        client.connect().await.unwrap();
        let mut server = BufReader::new(remote);
        // NICK + USER
        for _ in 0..2 {
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
        }
        (client, server)
    }

    #[test]
    fn config_validation() {
        assert!(config().validate().is_ok());

        for port in [0, 20, 70000] {
            let cfg = Config { port, ..config() };
            assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        }
        let cfg = Config { server: " ".into(), ..config() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let cfg = Config { nick: "1bad".into(), ..config() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let cfg = Config { user: "".into(), ..config() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn short_reconnect_delay_is_raised() {
        let cfg = Config { reconnect_delay: Duration::from_secs(3), ..config() };
        assert_eq!(cfg.effective_reconnect_delay(), DEFAULT_RECONNECT_DELAY);
        let cfg = Config { reconnect_delay: Duration::from_secs(60), ..config() };
        assert_eq!(cfg.effective_reconnect_delay(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn status_queries_require_a_session() {
        let client = Client::new(config());
        assert!(!client.is_connected());
        assert!(matches!(client.uptime(), Err(Error::NotConnected)));
        assert!(matches!(client.connection_duration(), Err(Error::NotConnected)));
        assert_eq!(client.server(), "irc.example.org:6667");
    }

    #[tokio::test]
    async fn sending_while_disconnected_fails_at_the_encoder() {
        let client = Client::new(config());
        let err = client.send(Event::new("PING", ["x"])).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let client = Client::new(config());
        client.cleanup(false).await;
        client.cleanup(false).await;
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn flood_control_delays_bursts() {
        let (client, _server) = connected(config()).await;
        let start = Instant::now();
        for i in 0..20 {
            client.send(Event::new("PRIVMSG", ["#a"]).with_trailing(format!("line {i}")))
                .await
                .unwrap();
        }
        assert!(start.elapsed() > Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn allow_flood_sends_without_delay() {
        let (client, _server) = connected(Config { allow_flood: true, ..config() }).await;
        let start = Instant::now();
        for i in 0..20 {
            client
                .send(Event::new("PRIVMSG", ["#a"]).with_trailing("x".repeat(400 + i)))
                .await
                .unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn larger_lines_are_throttled_longer() {
        async fn delay_after_burst(len: usize) -> Duration {
            let (client, _server) = connected(config()).await;
            for _ in 0..8 {
                client.inner.state.write().rate.delay_for(10);
            }
            let start = Instant::now();
            client
                .send(Event::new("PRIVMSG", ["#a"]).with_trailing("x".repeat(len)))
                .await
                .unwrap();
            start.elapsed()
        }

        assert!(delay_after_burst(400).await > delay_after_burst(10).await);
    }

    #[tokio::test]
    async fn unthrottled_writes_reach_the_server() {
        let (client, mut server) = connected(config()).await;
        client.send_unthrottled(Event::new("PONG", ["abc"])).await.unwrap();
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line, "PONG abc\r\n");
        assert!(client.is_connected());
        assert!(client.uptime().is_ok());
        client.quit(false).await;
        assert!(!client.is_connected());
    }
}
