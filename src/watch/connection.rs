use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::cluster::ClusterApi;
use crate::cluster::ResourceSnapshot;
use crate::cluster::SharedCluster;
use crate::cluster::WatchEvent;
use crate::cluster::WatchEventKind;
use crate::cluster::WatchScope;
use crate::cluster::WatchStream;
use crate::config::BackoffPolicy;
use crate::config::WatchConfig;
use crate::errors::ClusterError;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceKey;
use crate::manifest::ResourceVersion;
use crate::utils::backoff_delay;
use crate::utils::with_jitter;
use crate::watch::ConnectionState;
use crate::watch::FailureReason;

/// Why the event pump stopped.
enum PumpExit {
    Cancelled,
    /// Server closed the stream cleanly.
    Ended,
    /// Resume token no longer valid.
    Expired,
    /// Terminal; no reconnect.
    Terminal(ClusterError),
    /// Transient; reconnect with backoff.
    Disconnected(ClusterError),
}

/// One physical watch connection serving every subscriber of a scope.
///
/// Owns the reconnect loop: establish, pump, and on failure either back off
/// and resume from the last delivered revision, or re-list and synthesize
/// the difference when the resume point has expired. Dispatch is serialized
/// in this task, so no listener ever observes reordered events.
pub(crate) struct ScopeConnection {
    scope: WatchScope,
    cluster: SharedCluster,
    listeners: Arc<DashMap<u64, mpsc::Sender<WatchEvent>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    config: WatchConfig,
    policy: BackoffPolicy,
    /// Latest identity delivered per object, for resync diffing.
    known: HashMap<ResourceKey, ResourceIdentity>,
    /// Last delivered revision; reconnects resume just after it.
    resume_from: Option<ResourceVersion>,
}

impl ScopeConnection {
    pub(crate) fn new(
        scope: WatchScope,
        cluster: SharedCluster,
        listeners: Arc<DashMap<u64, mpsc::Sender<WatchEvent>>>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        cancel: CancellationToken,
        config: WatchConfig,
        policy: BackoffPolicy,
    ) -> Self {
        ScopeConnection {
            scope,
            cluster,
            listeners,
            state_tx,
            cancel,
            config,
            policy,
            known: HashMap::new(),
            resume_from: None,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(scope = %self.scope, "watch connection starting");
        let mut attempt = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let api = self.cluster.load().api();
            let outcome = match api.watch(&self.scope, self.resume_from.clone()).await {
                Ok(stream) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    self.pump(stream).await
                }
                Err(e) => Self::classify(e),
            };

            match outcome {
                PumpExit::Cancelled => break,
                PumpExit::Terminal(e) => {
                    self.fail(FailureReason::PermissionDenied(e.to_string()));
                    return;
                }
                PumpExit::Expired => {
                    if !self.config.resync_on_expired {
                        self.fail(FailureReason::ResumeExpired);
                        return;
                    }
                    match self.resync(api.as_ref()).await {
                        // Re-watch immediately from the fresh state
                        Ok(()) => continue,
                        Err(e) if e.is_permission() => {
                            self.fail(FailureReason::PermissionDenied(e.to_string()));
                            return;
                        }
                        Err(e) => {
                            warn!(scope = %self.scope, error = %e, "resync failed");
                        }
                    }
                }
                PumpExit::Ended => {
                    debug!(scope = %self.scope, "watch stream ended, reconnecting");
                }
                PumpExit::Disconnected(e) => {
                    warn!(scope = %self.scope, error = %e, "watch stream lost");
                }
            }

            attempt += 1;
            if attempt > self.policy.max_retries {
                self.fail(FailureReason::RetriesExhausted(format!(
                    "gave up after {} reconnect attempts",
                    self.policy.max_retries
                )));
                return;
            }
            self.set_state(ConnectionState::Backoff { attempt });
            let delay = with_jitter(backoff_delay(&self.policy, attempt));
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(scope = %self.scope, "watch connection stopped");
    }

    /// Forward stream items until it breaks, the connection is cancelled, or
    /// a terminal error arrives.
    async fn pump(
        &mut self,
        mut stream: WatchStream,
    ) -> PumpExit {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    self.track(&event);
                    if !self.dispatch(event).await {
                        return PumpExit::Cancelled;
                    }
                }
                Some(Err(e)) => return Self::classify(e),
                None => return PumpExit::Ended,
            }
        }
    }

    fn classify(e: ClusterError) -> PumpExit {
        if matches!(e, ClusterError::WatchExpired { .. }) {
            PumpExit::Expired
        } else if e.is_permission() {
            PumpExit::Terminal(e)
        } else {
            PumpExit::Disconnected(e)
        }
    }

    /// Record what this event tells us about the scope, for later resync.
    fn track(
        &mut self,
        event: &WatchEvent,
    ) {
        let key = event.identity().key();
        match event.kind {
            WatchEventKind::Added | WatchEventKind::Modified => {
                self.known.insert(key, event.identity().clone());
            }
            WatchEventKind::Deleted => {
                self.known.remove(&key);
            }
        }
        if let Some(version) = event.version() {
            self.resume_from = Some(version.clone());
        }
    }

    /// Deliver one event to every listener, in subscriber-id-agnostic but
    /// per-listener-ordered fashion. Returns false when cancelled mid-send.
    async fn dispatch(
        &self,
        event: WatchEvent,
    ) -> bool {
        // Snapshot the sender set; holding dashmap guards across awaits
        // would block subscribe/unsubscribe on this shard
        let targets: Vec<(u64, mpsc::Sender<WatchEvent>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (subscriber, tx) in targets {
            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                res = tx.send(event.clone()) => res.is_ok(),
            };
            if !delivered {
                trace!(scope = %self.scope, subscriber, "listener gone, skipping");
            }
        }
        true
    }

    /// The resume window is gone: list the scope, diff against what was
    /// already delivered, and synthesize the events a live stream would have
    /// carried. Listeners converge without a restart.
    async fn resync(
        &mut self,
        api: &dyn ClusterApi,
    ) -> Result<(), ClusterError> {
        warn!(scope = %self.scope, "resume point expired, rebuilding from list");

        let snapshots = api.list(&self.scope).await?;

        let mut fresh: HashMap<ResourceKey, ResourceIdentity> = HashMap::new();
        let mut synthesized: Vec<WatchEvent> = Vec::new();

        for snapshot in snapshots {
            let key = snapshot.identity.key();
            match self.known.get(&key) {
                None => synthesized.push(WatchEvent {
                    kind: WatchEventKind::Added,
                    snapshot: snapshot.clone(),
                }),
                Some(prev) if prev.resource_version != snapshot.identity.resource_version => {
                    synthesized.push(WatchEvent {
                        kind: WatchEventKind::Modified,
                        snapshot: snapshot.clone(),
                    });
                }
                Some(_) => {}
            }
            fresh.insert(key, snapshot.identity.clone());
        }

        for (key, identity) in &self.known {
            if !fresh.contains_key(key) {
                synthesized.push(WatchEvent {
                    kind: WatchEventKind::Deleted,
                    snapshot: ResourceSnapshot::new(identity.clone(), Bytes::new()),
                });
            }
        }

        debug!(
            scope = %self.scope,
            events = synthesized.len(),
            "resync complete"
        );

        self.known = fresh;
        // The list is the new baseline; watch from current state
        self.resume_from = None;

        for event in synthesized {
            if !self.dispatch(event).await {
                // Cancelled; outer loop exits on its next check
                return Ok(());
            }
        }
        Ok(())
    }

    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        trace!(scope = %self.scope, state = ?state, "connection state");
        self.state_tx.send_replace(state);
    }

    /// Terminal exit: announce the reason and close every listener channel.
    fn fail(
        &self,
        reason: FailureReason,
    ) {
        warn!(scope = %self.scope, %reason, "watch connection failed terminally");
        self.set_state(ConnectionState::Failed { reason });
        // Dropping the senders ends each subscriber's stream
        self.listeners.clear();
    }
}
