//! Builder pattern implementation for constructing a [`SyncEngine`].
//!
//! Provides a fluent interface to configure the engine: settings come from
//! the configuration files unless supplied in memory, and the notification
//! hub and shutdown token can be shared with the host's own plumbing.
//!
//! ## Example
//! ```ignore
//! let engine = EngineBuilder::new(cluster, Some("config/kubesync.toml"))?
//!     .notifications(shared_hub)
//!     .shutdown_token(host_token)
//!     .build();
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::SyncEngine;
use crate::cluster::ClusterHandle;
use crate::cluster::SharedCluster;
use crate::config::SyncSettings;
use crate::notify::NotificationHub;
use crate::watch::WatchHub;
use crate::Result;

pub struct EngineBuilder {
    settings: SyncSettings,
    cluster: ClusterHandle,
    notifications: Option<Arc<NotificationHub>>,
    shutdown: Option<CancellationToken>,
}

impl EngineBuilder {
    /// Create a builder with settings loaded from configuration sources.
    ///
    /// # Arguments
    /// * `cluster` - Handle for the initial cluster context
    /// * `settings_path` - Optional path to a host-provided settings file
    pub fn new(
        cluster: ClusterHandle,
        settings_path: Option<&str>,
    ) -> Result<Self> {
        if let Some(path) = settings_path {
            info!(path, "loading engine settings");
        }
        let settings = SyncSettings::load(settings_path)?;
        Ok(Self::from_settings(cluster, settings))
    }

    /// Create a builder from in-memory settings, skipping file and
    /// environment sources.
    pub fn from_settings(
        cluster: ClusterHandle,
        settings: SyncSettings,
    ) -> Self {
        EngineBuilder {
            settings,
            cluster,
            notifications: None,
            shutdown: None,
        }
    }

    /// Replaces the entire settings tree.
    pub fn settings(
        mut self,
        settings: SyncSettings,
    ) -> Self {
        self.settings = settings;
        self
    }

    /// Shares a notification hub owned by the host, so engine notifications
    /// merge into an existing stream.
    pub fn notifications(
        mut self,
        hub: Arc<NotificationHub>,
    ) -> Self {
        self.notifications = Some(hub);
        self
    }

    /// Ties engine shutdown to a token the host controls. Cancelling it has
    /// the same effect as [`SyncEngine::shutdown`].
    pub fn shutdown_token(
        mut self,
        token: CancellationToken,
    ) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Assemble the engine. Watch connections are opened lazily on first
    /// subscription, so building is cheap and infallible.
    pub fn build(self) -> SyncEngine {
        let shutdown = self.shutdown.unwrap_or_default();
        let notifications = self
            .notifications
            .unwrap_or_else(|| Arc::new(NotificationHub::new()));
        let cluster: SharedCluster = Arc::new(ArcSwap::from_pointee(self.cluster));
        let hub = WatchHub::new(
            Arc::clone(&cluster),
            self.settings.watch,
            self.settings.retry.watch_reconnect,
            shutdown.child_token(),
        );

        SyncEngine {
            cluster,
            hub,
            notifications,
            bindings: DashMap::new(),
            settings: self.settings,
            shutdown,
        }
    }
}
