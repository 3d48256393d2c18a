use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cluster::SharedCluster;
use crate::cluster::WatchEvent;
use crate::cluster::WatchScope;
use crate::config::BackoffPolicy;
use crate::config::WatchConfig;
use crate::watch::ScopeConnection;

/// Lifecycle of one scope's physical connection, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Establishing (or re-establishing) the server stream.
    Connecting,
    /// Stream live, events flowing.
    Connected,
    /// Stream lost; waiting out the delay before reconnect `attempt`.
    Backoff { attempt: usize },
    /// Connection ended for good; subscribers will see their event
    /// channel close.
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Authorization failures are never retried.
    PermissionDenied(String),
    /// Reconnect budget spent.
    RetriesExhausted(String),
    /// Resume token expired and resynchronization is disabled.
    ResumeExpired,
}

impl fmt::Display for FailureReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FailureReason::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            FailureReason::RetriesExhausted(msg) => write!(f, "retries exhausted: {msg}"),
            FailureReason::ResumeExpired => f.write_str("resume point expired"),
        }
    }
}

/// Live handle to one scope subscription.
///
/// Events for the scope arrive in cluster order through [`Subscription::recv`].
/// Dropping the handle unsubscribes; when the last subscriber of a scope
/// goes away the shared connection shuts down.
pub struct Subscription {
    id: u64,
    scope: WatchScope,
    events: mpsc::Receiver<WatchEvent>,
    state: watch::Receiver<ConnectionState>,
    _guard: SubscriberGuard,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &WatchScope {
        &self.scope
    }

    /// Next event, in delivery order.
    ///
    /// `None` means the subscription is over: the connection failed
    /// terminally or the hub shut down. [`Subscription::state`] tells which.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.events.try_recv().ok()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Wait for the connection state to change, returning the new value.
    pub async fn state_changed(&mut self) -> ConnectionState {
        // A closed sender means the connection is gone; report what we last saw
        let _ = self.state.changed().await;
        self.state.borrow().clone()
    }

    /// Explicit unsubscribe; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

struct SubscriberGuard {
    hub: Arc<HubInner>,
    scope: WatchScope,
    id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        HubInner::unsubscribe(&self.hub, &self.scope, self.id);
    }
}

struct ScopeEntry {
    listeners: Arc<DashMap<u64, mpsc::Sender<WatchEvent>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    /// Bumped on every (re)spawn so a finished task cannot clobber the
    /// bookkeeping of its successor.
    generation: u64,
    running: bool,
}

struct HubInner {
    cluster: SharedCluster,
    config: WatchConfig,
    reconnect: BackoffPolicy,
    connections: DashMap<WatchScope, ScopeEntry>,
    next_subscriber_id: AtomicU64,
    shutdown: CancellationToken,
}

impl HubInner {
    fn unsubscribe(
        inner: &Arc<HubInner>,
        scope: &WatchScope,
        id: u64,
    ) {
        inner.connections.remove_if_mut(scope, |_, entry| {
            entry.listeners.remove(&id);
            if entry.listeners.is_empty() {
                debug!(scope = %scope, "last subscriber left, closing watch connection");
                entry.cancel.cancel();
                true
            } else {
                false
            }
        });
    }
}

/// Shared watch-connection registry. Cheap to clone; all clones observe the
/// same connections.
#[derive(Clone)]
pub struct WatchHub {
    inner: Arc<HubInner>,
}

impl WatchHub {
    pub(crate) fn new(
        cluster: SharedCluster,
        config: WatchConfig,
        reconnect: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        WatchHub {
            inner: Arc::new(HubInner {
                cluster,
                config,
                reconnect,
                connections: DashMap::new(),
                next_subscriber_id: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    /// Subscribe to change events for a scope.
    ///
    /// The first subscriber of a scope opens the physical connection; later
    /// ones attach to it and start receiving from the subscription point
    /// onward.
    pub fn subscribe(
        &self,
        scope: WatchScope,
    ) -> Subscription {
        let inner = &self.inner;
        let id = inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(inner.config.listener_buffer);

        let mut spawn_args = None;
        let state_rx = {
            let mut entry = inner
                .connections
                .entry(scope.clone())
                .or_insert_with(|| ScopeEntry {
                    listeners: Arc::new(DashMap::new()),
                    state_tx: Arc::new(watch::channel(ConnectionState::Connecting).0),
                    cancel: inner.shutdown.child_token(),
                    generation: 0,
                    running: false,
                });

            entry.listeners.insert(id, tx);
            if !entry.running {
                entry.running = true;
                entry.generation += 1;
                entry.cancel = inner.shutdown.child_token();
                spawn_args = Some((
                    entry.generation,
                    Arc::clone(&entry.listeners),
                    Arc::clone(&entry.state_tx),
                    entry.cancel.clone(),
                ));
            }
            entry.state_tx.subscribe()
        };

        // Spawn outside the map entry so the connection task never contends
        // with the shard lock we just held
        if let Some((generation, listeners, state_tx, cancel)) = spawn_args {
            self.spawn_connection(scope.clone(), generation, listeners, state_tx, cancel);
        }

        debug!(scope = %scope, subscriber = id, "subscribed");
        Subscription {
            id,
            scope: scope.clone(),
            events: rx,
            state: state_rx,
            _guard: SubscriberGuard {
                hub: Arc::clone(inner),
                scope,
                id,
            },
        }
    }

    fn spawn_connection(
        &self,
        scope: WatchScope,
        generation: u64,
        listeners: Arc<DashMap<u64, mpsc::Sender<WatchEvent>>>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        cancel: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);
        let connection = ScopeConnection::new(
            scope.clone(),
            inner.cluster.clone(),
            listeners,
            state_tx,
            cancel,
            inner.config,
            inner.reconnect,
        );

        tokio::spawn(async move {
            connection.run().await;
            if let Some(mut entry) = inner.connections.get_mut(&scope) {
                if entry.generation == generation {
                    entry.running = false;
                }
            }
        });
    }

    /// Number of live subscribers for a scope.
    pub fn subscriber_count(
        &self,
        scope: &WatchScope,
    ) -> usize {
        self.inner
            .connections
            .get(scope)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    /// Number of scopes with an active connection entry.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Current connection state for a scope, if one exists.
    pub fn state(
        &self,
        scope: &WatchScope,
    ) -> Option<ConnectionState> {
        self.inner
            .connections
            .get(scope)
            .map(|entry| entry.state_tx.borrow().clone())
    }

    /// Tear down every connection and re-establish each scope that still has
    /// subscribers. Listener sets and their channels survive; used after a
    /// cluster context switch.
    pub(crate) fn restart_all(&self) {
        let mut respawns = Vec::new();
        for mut entry in self.inner.connections.iter_mut() {
            entry.cancel.cancel();
            entry.generation += 1;
            entry.cancel = self.inner.shutdown.child_token();
            entry.running = true;
            respawns.push((
                entry.key().clone(),
                entry.generation,
                Arc::clone(&entry.listeners),
                Arc::clone(&entry.state_tx),
                entry.cancel.clone(),
            ));
        }
        for (scope, generation, listeners, state_tx, cancel) in respawns {
            debug!(scope = %scope, "restarting watch connection");
            self.spawn_connection(scope, generation, listeners, state_tx, cancel);
        }
    }

    /// Stop all connections and end every subscription.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        // Dropping entries drops the event senders, so subscribers observe
        // end-of-stream instead of hanging
        self.inner.connections.clear();
    }
}
