//! The host-facing entry point tying buffers, watches and the tree together.
//!
//! ## Key Responsibilities
//! - Owns the swappable cluster handle every component reads through
//! - Enforces one live binding per editor buffer
//! - Hands out resource trees and notification streams
//! - Coordinates shutdown across bindings, watches and trees
//!
//! ## Example Usage
//! ```ignore
//! let engine = EngineBuilder::from_settings(cluster, SyncSettings::default()).build();
//! let binding = engine.bind_buffer(buffer)?;
//! binding.pull().await?;
//! engine.shutdown();
//! ```

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::buffer::Buffer;
use crate::buffer::BufferId;
use crate::cluster::ClusterHandle;
use crate::cluster::SharedCluster;
use crate::config::SyncSettings;
use crate::errors::BindingError;
use crate::notify::Notification;
use crate::notify::NotificationHub;
use crate::sync::BindingControl;
use crate::sync::BindingHandle;
use crate::sync::EditorBinding;
use crate::tree::ResourceTree;
use crate::watch::WatchHub;
use crate::Result;

/// One engine per host session. Built by [`crate::EngineBuilder`], passed by
/// reference to everything that needs it; there is no global instance.
pub struct SyncEngine {
    pub(crate) cluster: SharedCluster,
    pub(crate) hub: WatchHub,
    pub(crate) notifications: Arc<NotificationHub>,
    pub(crate) bindings: DashMap<BufferId, BindingControl>,
    pub(crate) settings: SyncSettings,
    pub(crate) shutdown: CancellationToken,
}

impl SyncEngine {
    /// Bind an editor buffer to the cluster object its manifest names.
    ///
    /// At most one live binding exists per buffer id; a second call for the
    /// same buffer fails with [`BindingError::AlreadyBound`] until the first
    /// binding is closed or its handle dropped. A finished binding's seat is
    /// taken over silently.
    pub fn bind_buffer(
        &self,
        buffer: Arc<dyn Buffer>,
    ) -> Result<BindingHandle> {
        let id = buffer.id();
        match self.bindings.entry(id) {
            Entry::Occupied(mut seat) => {
                if !seat.get().is_finished() {
                    return Err(BindingError::AlreadyBound { buffer: id }.into());
                }
                let handle = self.spawn_binding(buffer);
                seat.insert(handle.control());
                Ok(handle)
            }
            Entry::Vacant(seat) => {
                let handle = self.spawn_binding(buffer);
                seat.insert(handle.control());
                Ok(handle)
            }
        }
    }

    /// Close the binding of a buffer, if one exists.
    ///
    /// Idempotent alternative to dropping the handle, for hosts that track
    /// buffers by id.
    pub fn close_buffer(
        &self,
        id: BufferId,
    ) -> bool {
        match self.bindings.remove(&id) {
            Some((_, seat)) => {
                info!(buffer = id, "closing binding");
                seat.close();
                true
            }
            None => false,
        }
    }

    /// Build a fresh navigation tree over the configured resource kinds.
    ///
    /// Each call returns an independent tree; a host with several explorer
    /// views gives each its own. Trees share the engine's watch connections.
    pub fn tree(&self) -> ResourceTree {
        ResourceTree::new(
            Arc::clone(&self.cluster),
            self.hub.clone(),
            self.settings.engine.kinds.clone(),
            self.settings.retry.cluster_ops,
            self.shutdown.child_token(),
        )
    }

    /// Stream of user-facing notifications from all components.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        self.notifications.subscribe()
    }

    /// Name of the cluster context currently in effect.
    pub fn cluster_context(&self) -> String {
        self.cluster.load().context().to_string()
    }

    /// Point the engine at a different cluster.
    ///
    /// Open bindings and trees stay alive: operations already in flight
    /// finish against the old cluster, every later operation uses the new
    /// one, and all watch connections reconnect there. Buffers and tree
    /// content keep showing the old cluster's state until the next pull,
    /// refresh or incoming event.
    pub fn swap_cluster(
        &self,
        handle: ClusterHandle,
    ) {
        let context = handle.context().to_string();
        info!(context = %context, "switching cluster context");
        self.cluster.store(Arc::new(handle));
        self.hub.restart_all();
        self.notifications
            .publish(Notification::info(format!("Switched to cluster context {context}")));
    }

    /// Number of bindings currently registered, finished ones included until
    /// their seat is reused or closed.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Stop everything: bindings, watch connections and trees spawned from
    /// this engine. Pending operations resolve with
    /// [`BindingError::ReplyDropped`].
    pub fn shutdown(&self) {
        info!("sync engine shutting down");
        self.shutdown.cancel();
        self.hub.shutdown();
        for seat in self.bindings.iter() {
            seat.value().close();
        }
        self.bindings.clear();
    }

    fn spawn_binding(
        &self,
        buffer: Arc<dyn Buffer>,
    ) -> BindingHandle {
        EditorBinding::spawn(
            buffer,
            Arc::clone(&self.cluster),
            self.hub.clone(),
            Arc::clone(&self.notifications),
            self.settings.retry.cluster_ops,
            self.settings.engine.notify_auto_refresh,
            self.shutdown.child_token(),
        )
    }
}
