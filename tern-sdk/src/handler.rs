//! Handler registry and the concurrent dispatch engine.
//!
//! Handlers are stored in two independent registries: an internal one for
//! the client's built-in behaviour (tracking, PING replies, nick collision)
//! and an external one for user handlers. Both are keyed by the upper-case
//! command and then by a random per-registration suffix.
//!
//! [`Caller::execute`] runs every handler matching an event concurrently,
//! each on its own task with its own copy of the event, and only returns
//! once all of them have finished. The read loop feeds events one at a
//! time, so handlers for one event never overlap with handlers for the
//! next. A handler that never completes therefore stalls dispatch for the
//! whole client; register it with [`Caller::add_bg`] instead if it has to
//! wait on something.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::task::JoinSet;

use crate::client::Client;
use crate::consts::ALL_EVENTS;
use crate::event::Event;

/// Length of the random part of a handler id. Ids are unique with
/// overwhelming probability (62^20 possibilities per command); collisions
/// are not checked for and would silently replace the earlier handler.
const CUID_LENGTH: usize = 20;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Something that reacts to an event.
///
/// Implemented for every `Fn(Client, Event) -> impl Future<Output = ()>`
/// closure and `async fn`.
pub trait Handler: Send + Sync + 'static {
    fn execute(&self, client: Client, event: Event) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn execute(&self, client: Client, event: Event) -> HandlerFuture {
        Box::pin(self(client, event))
    }
}

/// How a registered handler takes part in the join barrier.
#[derive(Clone)]
pub enum Callback {
    /// Runs on its own task; dispatch waits for it to finish.
    Inline(Arc<dyn Handler>),
    /// Runs on a detached task; counts as finished as soon as it is spawned.
    Background(Arc<dyn Handler>),
}

impl Callback {
    pub fn inline(handler: impl Handler) -> Self {
        Self::Inline(Arc::new(handler))
    }

    pub fn background(handler: impl Handler) -> Self {
        Self::Background(Arc::new(handler))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Callback::Inline"),
            Self::Background(_) => f.write_str("Callback::Background"),
        }
    }
}

/// command -> suffix -> callback
type Registry = HashMap<String, HashMap<String, Callback>>;

#[derive(Default)]
struct Registries {
    internal: Registry,
    external: Registry,
}

/// The handler registry and dispatch engine. Registrations outlive
/// connections: reconnecting never clears them.
#[derive(Default)]
pub struct Caller {
    registries: RwLock<Registries>,
}

struct Snapshot {
    cuid: String,
    callback: Callback,
}

impl Caller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user handler for `command` (or [`ALL_EVENTS`]). Returns the
    /// id to pass to [`Caller::remove`].
    pub fn add<F, Fut>(&self, command: &str, handler: F) -> String
    where
        F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(false, command, Callback::inline(handler))
    }

    /// Like [`Caller::add`], but the handler runs detached from the join
    /// barrier, so it may block for as long as it needs.
    pub fn add_bg<F, Fut>(&self, command: &str, handler: F) -> String
    where
        F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(false, command, Callback::background(handler))
    }

    /// Register an already-built callback.
    pub fn add_handler(&self, command: &str, callback: Callback) -> String {
        self.register(false, command, callback)
    }

    pub(crate) fn register(&self, internal: bool, command: &str, callback: Callback) -> String {
        let command = command.to_ascii_uppercase();
        let (cuid, uid) = generate_cuid(&command);

        let mut registries = self.registries.write();
        let registry = if internal {
            &mut registries.internal
        } else {
            &mut registries.external
        };
        registry
            .entry(command.clone())
            .or_default()
            .insert(uid, callback);
        drop(registries);

        tracing::debug!(%command, %cuid, internal, "registered handler");
        cuid
    }

    /// Remove a user handler by the id returned at registration. Returns
    /// `false` if the id is malformed or unknown. Internal handlers cannot
    /// be removed this way.
    pub fn remove(&self, cuid: &str) -> bool {
        let Some((command, uid)) = parse_cuid(cuid) else {
            return false;
        };

        let mut registries = self.registries.write();
        let Some(handlers) = registries.external.get_mut(command) else {
            return false;
        };
        if handlers.remove(uid).is_none() {
            return false;
        }
        if handlers.is_empty() {
            registries.external.remove(command);
        }
        drop(registries);

        tracing::debug!(%cuid, "removed handler");
        true
    }

    /// Remove every user handler for `command`.
    pub fn clear(&self, command: &str) {
        let command = command.to_ascii_uppercase();
        self.registries.write().external.remove(&command);
        tracing::debug!(%command, "cleared external handlers");
    }

    /// Remove every user handler.
    pub fn clear_external(&self) {
        self.registries.write().external.clear();
        tracing::debug!("cleared all external handlers");
    }

    pub(crate) fn clear_internal(&self) {
        self.registries.write().internal.clear();
        tracing::debug!("cleared all internal handlers");
    }

    /// Number of user handlers.
    pub fn len(&self) -> usize {
        count_all(&self.registries.read().external)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of user handlers registered for `command`.
    pub fn count(&self, command: &str) -> usize {
        let command = command.to_ascii_uppercase();
        self.registries
            .read()
            .external
            .get(&command)
            .map_or(0, HashMap::len)
    }

    #[cfg(test)]
    pub(crate) fn internal_count(&self, command: &str) -> usize {
        self.registries
            .read()
            .internal
            .get(&command.to_ascii_uppercase())
            .map_or(0, HashMap::len)
    }

    fn snapshot(&self, command: &str) -> Vec<Snapshot> {
        let registries = self.registries.read();
        let mut keys = vec![ALL_EVENTS];
        if command != ALL_EVENTS {
            keys.push(command);
        }

        let mut stack = Vec::new();
        for registry in [&registries.internal, &registries.external] {
            for key in &keys {
                if let Some(handlers) = registry.get(*key) {
                    stack.extend(handlers.iter().map(|(uid, callback)| Snapshot {
                        cuid: format!("{key}:{uid}"),
                        callback: callback.clone(),
                    }));
                }
            }
        }
        stack
    }

    /// Run every handler registered for `command` and for [`ALL_EVENTS`],
    /// internal ones first, and wait for all of them to finish.
    ///
    /// There is no ordering between handlers of the same event. A panic in
    /// one handler is logged and does not affect the others.
    pub async fn execute(&self, command: &str, client: &Client, event: &Event) {
        let stack = self.snapshot(&command.to_ascii_uppercase());
        if stack.is_empty() {
            return;
        }

        let mut running = JoinSet::new();
        for Snapshot { cuid, callback } in stack {
            let client = client.clone();
            let event = event.clone();
            let command = command.to_string();
            match callback {
                Callback::Inline(handler) => {
                    running.spawn(run_handler(cuid, command, handler, client, event));
                }
                Callback::Background(handler) => {
                    tokio::spawn(run_handler(cuid, command, handler, client, event));
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("handler for {command} panicked: {e}");
                }
            }
        }
    }
}

async fn run_handler(
    cuid: String,
    command: String,
    handler: Arc<dyn Handler>,
    client: Client,
    event: Event,
) {
    tracing::debug!(%cuid, %command, "executing handler");
    let start = Instant::now();
    handler.execute(client, event).await;
    tracing::debug!(%cuid, %command, elapsed = ?start.elapsed(), "handler finished");
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registries = self.registries.read();
        write!(
            f,
            "<Caller external:{} internal:{}>",
            count_all(&registries.external),
            count_all(&registries.internal)
        )
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn count_all(registry: &Registry) -> usize {
    registry.values().map(HashMap::len).sum()
}

fn generate_cuid(command: &str) -> (String, String) {
    let uid: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CUID_LENGTH)
        .map(char::from)
        .collect();
    (format!("{command}:{uid}"), uid)
}

fn parse_cuid(cuid: &str) -> Option<(&str, &str)> {
    let (command, uid) = cuid.split_once(':')?;
    if command.is_empty() || uid.len() != CUID_LENGTH {
        return None;
    }
    Some((command, uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client() -> Client {
        Client::new(Config::default())
    }

    fn counter(caller: &Caller, command: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        caller.add(command, move |_, _| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        hits
    }

    #[test]
    fn cuid_round_trips() {
        let (cuid, uid) = generate_cuid("PRIVMSG");
        assert_eq!(uid.len(), CUID_LENGTH);
        assert_eq!(parse_cuid(&cuid), Some(("PRIVMSG", uid.as_str())));
        assert!(parse_cuid("PRIVMSG").is_none());
        assert!(parse_cuid(":abc").is_none());
        assert!(parse_cuid("PRIVMSG:short").is_none());
    }

    #[test]
    fn registration_is_case_insensitive() {
        let caller = Caller::new();
        let cuid = caller.add("privmsg", |_, _| async {});
        assert!(cuid.starts_with("PRIVMSG:"));
        assert_eq!(caller.count("PRIVMSG"), 1);
        assert_eq!(caller.count("privmsg"), 1);
        assert_eq!(caller.len(), 1);
    }

    #[test]
    fn remove_unknown_or_malformed_is_noop() {
        let caller = Caller::new();
        caller.add("JOIN", |_, _| async {});
        assert!(!caller.remove("garbage"));
        assert!(!caller.remove("JOIN:aaaaaaaaaaaaaaaaaaaa"));
        assert!(!caller.remove("PART:aaaaaaaaaaaaaaaaaaaa"));
        assert_eq!(caller.len(), 1);
    }

    #[test]
    fn internal_handlers_are_not_removable() {
        let caller = Caller::new();
        let cuid = caller.register(true, "PING", Callback::inline(|_, _| async {}));
        assert!(!caller.remove(&cuid));
        assert_eq!(caller.internal_count("PING"), 1);
        caller.clear_external();
        assert_eq!(caller.internal_count("PING"), 1);
        caller.clear_internal();
        assert_eq!(caller.internal_count("PING"), 0);
    }

    #[test]
    fn display_counts_both_registries() {
        let caller = Caller::new();
        caller.add("A", |_, _| async {});
        caller.add("B", |_, _| async {});
        caller.register(true, "C", Callback::inline(|_, _| async {}));
        assert_eq!(caller.to_string(), "<Caller external:2 internal:1>");
    }

    #[tokio::test]
    async fn wildcard_runs_once_alongside_specific() {
        let client = client();
        let caller = Caller::new();
        let all = counter(&caller, ALL_EVENTS);
        let privmsg = counter(&caller, "PRIVMSG");
        let notice = counter(&caller, "NOTICE");

        for _ in 0..3 {
            let event = Event::new("PRIVMSG", ["#a"]).with_trailing("hi");
            caller.execute(&event.command, &client, &event).await;
        }
        let event = Event::new("NOTICE", ["#a"]).with_trailing("hi");
        caller.execute(&event.command, &client, &event).await;

        assert_eq!(all.load(Ordering::SeqCst), 4);
        assert_eq!(privmsg.load(Ordering::SeqCst), 3);
        assert_eq!(notice.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removed_handler_is_not_invoked() {
        let client = client();
        let caller = Caller::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let cuid = caller.add("JOIN", move |_, _| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let event = Event::new("JOIN", ["#a"]);
        caller.execute("JOIN", &client, &event).await;
        assert!(caller.remove(&cuid));
        assert!(!caller.remove(&cuid));
        caller.execute("JOIN", &client, &event).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(caller.count("JOIN"), 0);
    }

    #[tokio::test]
    async fn execute_waits_for_every_handler() {
        let client = client();
        let caller = Caller::new();
        let done = Arc::new(AtomicUsize::new(0));
        for delay in [30u64, 10, 20] {
            let done = done.clone();
            caller.add("PRIVMSG", move |_, _| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let event = Event::new("PRIVMSG", ["#a"]);
        caller.execute("PRIVMSG", &client, &event).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn background_handler_does_not_hold_the_barrier() {
        let client = client();
        let caller = Caller::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let finished = Arc::new(AtomicUsize::new(0));

        let seen = finished.clone();
        caller.add_bg("PRIVMSG", move |_, _| {
            let release_rx = release_rx.clone();
            let seen = seen.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let event = Event::new("PRIVMSG", ["#a"]);
        tokio::time::timeout(
            Duration::from_secs(5),
            caller.execute("PRIVMSG", &client, &event),
        )
        .await
        .expect("execute must not wait on a background handler");
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if finished.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handlers_get_independent_copies() {
        let client = client();
        let caller = Caller::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for _ in 0..2 {
            let tx = tx.clone();
            caller.add("TOPIC", move |_, mut event: Event| {
                let tx = tx.clone();
                async move {
                    event.params.push("mutated".to_string());
                    let _ = tx.send(event.params.len());
                }
            });
        }

        let event = Event::new("TOPIC", ["#a"]);
        caller.execute("TOPIC", &client, &event).await;
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(event.params.len(), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_poison_dispatch() {
        let client = client();
        let caller = Caller::new();
        caller.add("KICK", |_, _| async { panic!("boom") });
        let hits = counter(&caller, "KICK");

        let event = Event::new("KICK", ["#a", "nick"]);
        caller.execute("KICK", &client, &event).await;
        caller.execute("KICK", &client, &event).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
