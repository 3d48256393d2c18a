use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceVersion;

/// One observed state of a cluster object: identity plus full manifest text.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub identity: ResourceIdentity,
    /// Manifest as served by the cluster, UTF-8 YAML.
    pub content: Bytes,
}

impl ResourceSnapshot {
    pub fn new(
        identity: ResourceIdentity,
        content: Bytes,
    ) -> Self {
        ResourceSnapshot { identity, content }
    }

    /// Manifest text for editor consumption.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn version(&self) -> Option<&ResourceVersion> {
        self.identity.resource_version.as_ref()
    }
}

/// What happened to the object a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for WatchEventKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            WatchEventKind::Added => "Added",
            WatchEventKind::Modified => "Modified",
            WatchEventKind::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// One change notification from a watch stream.
///
/// For `Deleted` events the snapshot carries the object's final observed
/// state; synthesized deletions after a resync carry empty content.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub snapshot: ResourceSnapshot,
}

impl WatchEvent {
    pub fn identity(&self) -> &ResourceIdentity {
        &self.snapshot.identity
    }

    pub fn version(&self) -> Option<&ResourceVersion> {
        self.snapshot.version()
    }
}

/// What a watch covers: one kind, in one namespace or across all of them.
///
/// Scopes key physical watch connections, so two subscribers naming the
/// same scope share one server stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchScope {
    pub kind: String,
    /// `None` watches the kind across all namespaces.
    pub namespace: Option<String>,
}

impl WatchScope {
    pub fn namespaced(
        kind: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        WatchScope {
            kind: kind.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn all_namespaces(kind: impl Into<String>) -> Self {
        WatchScope {
            kind: kind.into(),
            namespace: None,
        }
    }

    /// Scope for the object a manifest declares.
    pub fn of(identity: &ResourceIdentity) -> Self {
        WatchScope {
            kind: identity.kind.clone(),
            namespace: identity.namespace.clone(),
        }
    }

    /// Whether an object with this identity falls inside the scope.
    pub fn matches(
        &self,
        identity: &ResourceIdentity,
    ) -> bool {
        if self.kind != identity.kind {
            return false;
        }
        match &self.namespace {
            Some(ns) => identity.namespace.as_deref() == Some(ns.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for WatchScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} in {}", self.kind, ns),
            None => write!(f, "{} in all namespaces", self.kind),
        }
    }
}
