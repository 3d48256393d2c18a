use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::cluster::ResourceSnapshot;
use crate::cluster::WatchEvent;
use crate::cluster::WatchScope;
use crate::errors::ClusterError;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceVersion;

/// Stream of watch events for one scope.
///
/// Ends with an `Err` item on stream-level failure; a clean `None` means the
/// server closed the watch and the caller may reconnect.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClusterError>>;

/// Transport seam to one cluster.
///
/// Implementations wrap a concrete client (HTTP API server, test fake) and
/// are shared behind `Arc` across the hub, bindings and tree. All methods
/// are callable concurrently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Point read of a single object.
    ///
    /// # Errors
    /// [`ClusterError::NotFound`] when no object with this identity exists.
    async fn get(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<ResourceSnapshot, ClusterError>;

    /// List every object inside a scope.
    async fn list(
        &self,
        scope: &WatchScope,
    ) -> Result<Vec<ResourceSnapshot>, ClusterError>;

    /// Open a watch stream for a scope.
    ///
    /// With `resume_from`, replay starts just after that revision;
    /// [`ClusterError::WatchExpired`] signals the token fell out of the
    /// server's retention window and the caller must list and re-watch.
    /// Without a token the stream starts at the current state, delivering
    /// changes from now on.
    async fn watch(
        &self,
        scope: &WatchScope,
        resume_from: Option<ResourceVersion>,
    ) -> Result<WatchStream, ClusterError>;

    /// Replace an object's manifest, returning the new version token.
    ///
    /// With `expected`, the write is compare-and-swap: it fails with
    /// [`ClusterError::Conflict`] if the cluster holds any other version.
    /// Without it the write overwrites unconditionally.
    async fn update(
        &self,
        identity: &ResourceIdentity,
        content: Bytes,
        expected: Option<&ResourceVersion>,
    ) -> Result<ResourceVersion, ClusterError>;

    /// Create an object that does not exist yet, returning its first
    /// version token.
    async fn create(
        &self,
        identity: &ResourceIdentity,
        content: Bytes,
    ) -> Result<ResourceVersion, ClusterError>;
}

/// A named cluster connection: context label plus the API implementation.
#[derive(Clone)]
pub struct ClusterHandle {
    context: String,
    api: Arc<dyn ClusterApi>,
}

impl ClusterHandle {
    pub fn new(
        context: impl Into<String>,
        api: Arc<dyn ClusterApi>,
    ) -> Self {
        ClusterHandle {
            context: context.into(),
            api,
        }
    }

    /// Host-facing label of the cluster context (kubeconfig context name).
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn api(&self) -> Arc<dyn ClusterApi> {
        Arc::clone(&self.api)
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Hot-swappable cluster reference.
///
/// Long-lived components hold this and `load()` per operation, so a context
/// switch takes effect on the next call without restarting them.
pub(crate) type SharedCluster = Arc<ArcSwap<ClusterHandle>>;
