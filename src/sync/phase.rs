use std::fmt;

/// Why a binding sits in [`SyncPhase::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// The object was absent when the binding tried to load it.
    NotFound,
    /// The object disappeared from the cluster after binding.
    Deleted,
    /// The buffer does not hold a bindable manifest.
    Manifest,
    /// A cluster call failed for good (after retries, where they apply).
    Cluster,
}

/// Lifecycle of one buffer-to-object binding.
///
/// ```text
/// Unbound -> Loading -> Synced <-> LocalModified
///                          \           |
///                           \          v
///                            +----> Conflict
/// ```
///
/// `RemoteModified` is passed through while a remote change is being applied
/// to a clean buffer. `Error` and `Closed` are reachable from everywhere;
/// only `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Unbound,
    Loading,
    /// Buffer, last-synced state and cluster agree.
    Synced,
    /// Buffer has edits not yet pushed.
    LocalModified,
    /// A remote change is being folded into a clean buffer.
    RemoteModified,
    /// Both sides changed; waiting on an explicit pull or forced push.
    Conflict,
    Error(ErrorReason),
    Closed,
}

impl SyncPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::Unbound => "unbound",
            SyncPhase::Loading => "loading",
            SyncPhase::Synced => "synced",
            SyncPhase::LocalModified => "local-modified",
            SyncPhase::RemoteModified => "remote-modified",
            SyncPhase::Conflict => "conflict",
            SyncPhase::Error(ErrorReason::NotFound) => "error-not-found",
            SyncPhase::Error(ErrorReason::Deleted) => "error-deleted",
            SyncPhase::Error(ErrorReason::Manifest) => "error-manifest",
            SyncPhase::Error(ErrorReason::Cluster) => "error-cluster",
            SyncPhase::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SyncPhase::Closed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}
