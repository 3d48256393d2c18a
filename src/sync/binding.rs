use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::divergence::classify;
use super::divergence::SyncAction;
use super::phase::ErrorReason;
use super::phase::SyncPhase;
use crate::buffer::Buffer;
use crate::buffer::BufferId;
use crate::cluster::ResourceSnapshot;
use crate::cluster::SharedCluster;
use crate::cluster::WatchEvent;
use crate::cluster::WatchEventKind;
use crate::cluster::WatchScope;
use crate::config::BackoffPolicy;
use crate::errors::BindingError;
use crate::errors::ClusterError;
use crate::errors::Error;
use crate::manifest::parse_identity;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceVersion;
use crate::notify::Notification;
use crate::notify::NotificationHub;
use crate::notify::NotifyHint;
use crate::utils::retry_cluster_op;
use crate::watch::Subscription;
use crate::watch::WatchHub;

/// How a push may go beyond the plain compare-and-swap write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Overwrite even if the cluster moved past the last synced version.
    /// Without it such a push fails and the binding enters conflict.
    pub force_overwrite: bool,
    /// Recreate the object if it was deleted underneath the buffer.
    pub create_missing: bool,
}

pub(crate) enum BindingCommand {
    Pull {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Push {
        options: PushOptions,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    ExistsOnCluster {
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    BufferChanged,
}

/// Caller-side face of one binding actor.
///
/// Cluster-touching operations are requests into the actor's mailbox and
/// resolve when it has processed them; the mailbox is what serializes
/// pull, push and watch application for a binding. Dropping the handle
/// closes the binding.
pub struct BindingHandle {
    buffer_id: BufferId,
    commands: mpsc::UnboundedSender<BindingCommand>,
    phase: watch::Receiver<SyncPhase>,
    cancel: CancellationToken,
}

impl BindingHandle {
    /// Re-read the object and make the buffer match it.
    ///
    /// Valid in every phase and idempotent; this is the escape hatch out of
    /// conflict and error phases.
    pub async fn pull(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(BindingCommand::Pull { reply: tx })
            .map_err(|_| BindingError::Closed)?;
        rx.await.map_err(|_| BindingError::ReplyDropped)?
    }

    /// Write the buffer content to the cluster.
    pub async fn push(
        &self,
        options: PushOptions,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(BindingCommand::Push { options, reply: tx })
            .map_err(|_| BindingError::Closed)?;
        rx.await.map_err(|_| BindingError::ReplyDropped)?
    }

    /// Whether the bound object currently exists on the cluster.
    pub async fn exists_on_cluster(&self) -> Result<bool, Error> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(BindingCommand::ExistsOnCluster { reply: tx })
            .map_err(|_| BindingError::Closed)?;
        rx.await.map_err(|_| BindingError::ReplyDropped)?
    }

    /// Tell the binding the host changed the buffer text. Cheap, callable
    /// on every keystroke; dirtiness is recomputed by the actor.
    pub fn buffer_changed(&self) {
        let _ = self.commands.send(BindingCommand::BufferChanged);
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Live view of phase transitions, for rendering sync badges.
    pub fn phase_stream(&self) -> watch::Receiver<SyncPhase> {
        self.phase.clone()
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }

    /// Close the binding: in-flight work is cancelled, its effects are not
    /// applied, and the watch registration is released.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn control(&self) -> BindingControl {
        BindingControl {
            cancel: self.cancel.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl Drop for BindingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Registry-side control over a binding whose handle the caller owns.
pub(crate) struct BindingControl {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<BindingCommand>,
}

impl BindingControl {
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }

    /// True once the actor has stopped, however that happened.
    pub(crate) fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }
}

enum Step {
    Command(BindingCommand),
    Watch(Option<WatchEvent>),
    Shutdown,
}

/// Actor tying one editor buffer to one cluster object.
pub(crate) struct EditorBinding {
    buffer: Arc<dyn Buffer>,
    cluster: SharedCluster,
    hub: WatchHub,
    notifications: Arc<NotificationHub>,
    retry: BackoffPolicy,
    notify_auto_refresh: bool,
    commands: mpsc::UnboundedReceiver<BindingCommand>,
    phase_tx: watch::Sender<SyncPhase>,
    cancel: CancellationToken,

    identity: Option<ResourceIdentity>,
    subscription: Option<Subscription>,
    last_synced_content: Option<String>,
    last_synced_version: Option<ResourceVersion>,
}

impl EditorBinding {
    /// Spawn the actor for a buffer and hand back its caller handle.
    ///
    /// The initial load runs inside the actor; the handle is usable
    /// immediately and observes the load through the phase stream.
    pub(crate) fn spawn(
        buffer: Arc<dyn Buffer>,
        cluster: SharedCluster,
        hub: WatchHub,
        notifications: Arc<NotificationHub>,
        retry: BackoffPolicy,
        notify_auto_refresh: bool,
        cancel: CancellationToken,
    ) -> BindingHandle {
        let buffer_id = buffer.id();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SyncPhase::Unbound);

        let actor = EditorBinding {
            buffer,
            cluster,
            hub,
            notifications,
            retry,
            notify_auto_refresh,
            commands: command_rx,
            phase_tx,
            cancel: cancel.clone(),
            identity: None,
            subscription: None,
            last_synced_content: None,
            last_synced_version: None,
        };
        tokio::spawn(actor.run());

        BindingHandle {
            buffer_id,
            commands: command_tx,
            phase: phase_rx,
            cancel,
        }
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.finish();
                return;
            }
            _ = self.bind() => {}
        }

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Shutdown,
                event = Self::next_watch(&mut self.subscription) => Step::Watch(event),
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Shutdown,
                },
            };

            match step {
                Step::Shutdown => break,
                Step::Watch(Some(event)) => self.handle_watch_event(event),
                Step::Watch(None) => self.handle_watch_gone(),
                Step::Command(command) => {
                    // A close that lands mid-operation drops the reply and
                    // leaves the binding untouched by the late result
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.handle_command(command) => {}
                    }
                }
            }
        }
        self.finish();
    }

    /// Watch arm of the actor loop; pends forever once the subscription is
    /// gone so the mailbox keeps the loop alive alone.
    async fn next_watch(subscription: &mut Option<Subscription>) -> Option<WatchEvent> {
        match subscription {
            Some(subscription) => subscription.recv().await,
            None => std::future::pending().await,
        }
    }

    fn finish(mut self) {
        self.subscription = None;
        self.set_phase(SyncPhase::Closed);
        debug!(buffer = self.buffer.id(), "binding closed");
    }

    // ---------------------------------------------
    // Initial load
    // ---------------------------------------------

    async fn bind(&mut self) {
        self.set_phase(SyncPhase::Loading);
        let text = self.buffer.read();
        let identity = match parse_identity(&text) {
            Ok(identity) => identity,
            Err(error) => {
                warn!(buffer = self.buffer.id(), error = %error, "buffer is not a bindable manifest");
                self.notifications.publish(
                    Notification::error("Buffer does not hold a valid manifest")
                        .with_cause(&error)
                        .for_buffer(self.buffer.id()),
                );
                self.set_phase(SyncPhase::Error(ErrorReason::Manifest));
                return;
            }
        };

        info!(buffer = self.buffer.id(), object = %identity, "binding buffer");
        // Subscribe before the read so nothing slips between snapshot and
        // stream start; early events queue until the loop runs
        self.subscription = Some(self.hub.subscribe(WatchScope::of(&identity)));
        self.identity = Some(identity.clone());

        match self.fetch(&identity).await {
            Ok(snapshot) => self.adopt_remote(&snapshot),
            Err(error @ ClusterError::NotFound { .. }) => {
                self.notifications.publish(
                    Notification::warning(format!("{identity} does not exist on the cluster"))
                        .with_cause(&error)
                        .for_buffer(self.buffer.id()),
                );
                self.set_phase(SyncPhase::Error(ErrorReason::NotFound));
            }
            Err(error) => {
                warn!(object = %identity, error = %error, "initial load failed");
                self.notifications.publish(
                    Notification::error(format!("Cannot load {identity}"))
                        .with_cause(&error)
                        .for_buffer(self.buffer.id()),
                );
                self.set_phase(SyncPhase::Error(ErrorReason::Cluster));
            }
        }
    }

    // ---------------------------------------------
    // Commands
    // ---------------------------------------------

    async fn handle_command(
        &mut self,
        command: BindingCommand,
    ) {
        match command {
            BindingCommand::Pull { reply } => {
                let _ = reply.send(self.pull().await);
            }
            BindingCommand::Push { options, reply } => {
                let _ = reply.send(self.push(options).await);
            }
            BindingCommand::ExistsOnCluster { reply } => {
                let _ = reply.send(self.exists_on_cluster().await);
            }
            BindingCommand::BufferChanged => self.on_buffer_changed(),
        }
    }

    fn on_buffer_changed(&mut self) {
        let dirty = self.is_dirty();
        match self.current() {
            SyncPhase::Synced if dirty => self.set_phase(SyncPhase::LocalModified),
            SyncPhase::LocalModified if !dirty => self.set_phase(SyncPhase::Synced),
            // Matching the last synced text does not resolve a conflict;
            // the remote still differs from it
            _ => {}
        }
    }

    async fn pull(&mut self) -> Result<(), Error> {
        let identity = match self.identity.clone() {
            Some(identity) => identity,
            // Initial parse failed; the buffer may hold a fixed manifest now
            None => {
                let text = self.buffer.read();
                match parse_identity(&text) {
                    Ok(identity) => {
                        self.subscription =
                            Some(self.hub.subscribe(WatchScope::of(&identity)));
                        self.identity = Some(identity.clone());
                        identity
                    }
                    Err(error) => {
                        self.set_phase(SyncPhase::Error(ErrorReason::Manifest));
                        return Err(error.into());
                    }
                }
            }
        };

        match self.fetch(&identity).await {
            Ok(snapshot) => {
                self.adopt_remote(&snapshot);
                Ok(())
            }
            Err(error @ ClusterError::NotFound { .. }) => {
                self.set_phase(SyncPhase::Error(ErrorReason::NotFound));
                self.notifications.publish(
                    Notification::warning(format!("{identity} is gone from the cluster"))
                        .with_cause(&error)
                        .for_buffer(self.buffer.id()),
                );
                Err(error.into())
            }
            // Keep the current phase; the caller sees the error and the
            // binding still knows its last good state
            Err(error) => Err(error.into()),
        }
    }

    async fn push(
        &mut self,
        options: PushOptions,
    ) -> Result<(), Error> {
        let phase = self.current();
        // Pushing from the absent phases is allowed so the attempt itself
        // reports not-found (or recreates, with the option); anything else
        // outside the modified phases is a caller bug
        let allowed = matches!(
            phase,
            SyncPhase::LocalModified
                | SyncPhase::Conflict
                | SyncPhase::Error(ErrorReason::Deleted)
                | SyncPhase::Error(ErrorReason::NotFound)
        );
        if !allowed {
            return Err(BindingError::IllegalOperation {
                op: "push",
                phase: phase.name(),
            }
            .into());
        }
        let identity = self.identity.clone().ok_or(BindingError::NotBound)?;
        let content = self.buffer.read();

        // Re-check the remote side before writing
        let remote = match self.fetch(&identity).await {
            Ok(snapshot) => Some(snapshot),
            Err(ClusterError::NotFound { .. }) => None,
            Err(error) => return Err(error.into()),
        };

        let remote_version = match remote {
            None => return self.push_create(&identity, &content, options).await,
            Some(snapshot) => snapshot
                .version()
                .cloned()
                .unwrap_or_else(|| ResourceVersion::new("")),
        };

        let advanced = Some(&remote_version) != self.last_synced_version.as_ref();
        if advanced && !options.force_overwrite {
            // Never overwrite remote changes the user has not seen
            self.set_phase(SyncPhase::Conflict);
            let error = ClusterError::Conflict {
                identity: identity.clone(),
                expected: self
                    .last_synced_version
                    .clone()
                    .unwrap_or_else(|| ResourceVersion::new("")),
                current: remote_version,
            };
            self.notifications.publish(
                Notification::warning(format!(
                    "{identity} changed on the cluster since the last sync"
                ))
                .with_cause(&error)
                .for_buffer(self.buffer.id())
                .with_hint(NotifyHint::ConflictReloadOrPush),
            );
            return Err(error.into());
        }

        let expected = if options.force_overwrite {
            None
        } else {
            self.last_synced_version.clone()
        };
        let api = self.cluster.load().api();
        match api
            .update(&identity, content.clone().into(), expected.as_ref())
            .await
        {
            Ok(version) => {
                info!(object = %identity, version = %version, "pushed");
                self.adopt_pushed(content, version);
                Ok(())
            }
            Err(error @ ClusterError::Conflict { .. }) => {
                // Lost the race between the re-check and the write
                self.set_phase(SyncPhase::Conflict);
                self.notifications.publish(
                    Notification::warning(format!("Push of {identity} hit a newer version"))
                        .with_cause(&error)
                        .for_buffer(self.buffer.id())
                        .with_hint(NotifyHint::ConflictReloadOrPush),
                );
                Err(error.into())
            }
            Err(error @ ClusterError::NotFound { .. }) => {
                self.mark_deleted(&identity);
                Err(error.into())
            }
            Err(error) => {
                warn!(object = %identity, error = %error, "push failed");
                Err(error.into())
            }
        }
    }

    async fn push_create(
        &mut self,
        identity: &ResourceIdentity,
        content: &str,
        options: PushOptions,
    ) -> Result<(), Error> {
        if !options.create_missing {
            let error = ClusterError::NotFound {
                identity: identity.clone(),
            };
            self.mark_deleted(identity);
            return Err(error.into());
        }

        let api = self.cluster.load().api();
        match api.create(identity, content.to_string().into()).await {
            Ok(version) => {
                info!(object = %identity, version = %version, "created on push");
                self.notifications.publish(
                    Notification::info(format!("Created {identity}"))
                        .for_buffer(self.buffer.id()),
                );
                self.adopt_pushed(content.to_string(), version);
                Ok(())
            }
            Err(error) => {
                warn!(object = %identity, error = %error, "create failed");
                self.notifications.publish(
                    Notification::error(format!("Cannot create {identity}"))
                        .with_cause(&error)
                        .for_buffer(self.buffer.id()),
                );
                Err(error.into())
            }
        }
    }

    async fn exists_on_cluster(&self) -> Result<bool, Error> {
        let identity = self.identity.clone().ok_or(BindingError::NotBound)?;
        match self.fetch(&identity).await {
            Ok(_) => Ok(true),
            Err(ClusterError::NotFound { .. }) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    // ---------------------------------------------
    // Watch events
    // ---------------------------------------------

    fn handle_watch_event(
        &mut self,
        event: WatchEvent,
    ) {
        let identity = match &self.identity {
            Some(identity) => identity,
            None => return,
        };
        // The scope stream carries sibling objects too
        if !identity.same_object(event.identity()) {
            return;
        }

        if event.kind == WatchEventKind::Deleted {
            let identity = identity.clone();
            self.mark_deleted(&identity);
            return;
        }

        let remote_advanced = match (event.version(), self.last_synced_version.as_ref()) {
            (Some(incoming), Some(synced)) => incoming != synced,
            // Without both tokens there is nothing to compare; assume moved
            _ => true,
        };

        match classify(self.is_dirty(), remote_advanced) {
            SyncAction::NoOp => {
                debug!(object = %event.identity(), "watch event needs no action");
            }
            SyncAction::AutoRefresh => {
                debug!(object = %event.identity(), "remote changed, refreshing clean buffer");
                self.set_phase(SyncPhase::RemoteModified);
                self.adopt_remote(&event.snapshot);
                if self.notify_auto_refresh {
                    self.notifications.publish(
                        Notification::info(format!(
                            "{} was updated from the cluster",
                            event.identity()
                        ))
                        .for_buffer(self.buffer.id()),
                    );
                }
            }
            SyncAction::Conflict => {
                self.set_phase(SyncPhase::Conflict);
                self.notifications.publish(
                    Notification::warning(format!(
                        "{} changed on the cluster while the buffer has local edits",
                        event.identity()
                    ))
                    .for_buffer(self.buffer.id())
                    .with_hint(NotifyHint::ConflictReloadOrPush),
                );
            }
        }
    }

    fn handle_watch_gone(&mut self) {
        self.subscription = None;
        warn!(buffer = self.buffer.id(), "watch stream ended; updates may go stale");
        self.notifications.publish(
            Notification::warning("Live updates for this buffer stopped")
                .for_buffer(self.buffer.id())
                .with_hint(NotifyHint::WatchLost),
        );
    }

    // ---------------------------------------------
    // Shared state transitions
    // ---------------------------------------------

    /// Make the buffer and the synced markers match a remote snapshot.
    fn adopt_remote(
        &mut self,
        snapshot: &ResourceSnapshot,
    ) {
        let text = snapshot.text().into_owned();
        self.buffer.replace(&text);
        self.last_synced_content = Some(text);
        self.last_synced_version = snapshot.version().cloned();
        self.set_phase(SyncPhase::Synced);
    }

    /// Adopt a successful write: synced text is what we sent, synced version
    /// is what the cluster returned.
    fn adopt_pushed(
        &mut self,
        content: String,
        version: ResourceVersion,
    ) {
        self.last_synced_content = Some(content);
        self.last_synced_version = Some(version);
        self.set_phase(SyncPhase::Synced);
    }

    fn mark_deleted(
        &mut self,
        identity: &ResourceIdentity,
    ) {
        self.set_phase(SyncPhase::Error(ErrorReason::Deleted));
        self.notifications.publish(
            Notification::warning(format!("{identity} was deleted on the cluster"))
                .for_buffer(self.buffer.id())
                .with_hint(NotifyHint::ObjectDeleted),
        );
    }

    async fn fetch(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<ResourceSnapshot, ClusterError> {
        let api = self.cluster.load().api();
        retry_cluster_op("get", &self.retry, || {
            let api = Arc::clone(&api);
            let identity = identity.clone();
            async move { api.get(&identity).await }
        })
        .await
    }

    fn current(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    fn is_dirty(&self) -> bool {
        match &self.last_synced_content {
            Some(synced) => self.buffer.read() != *synced,
            None => false,
        }
    }

    fn set_phase(
        &self,
        next: SyncPhase,
    ) {
        let previous = self.current();
        if previous == next {
            return;
        }
        debug!(
            buffer = self.buffer.id(),
            from = %previous,
            to = %next,
            "sync phase transition"
        );
        self.phase_tx.send_replace(next);
    }
}
