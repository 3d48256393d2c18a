//! Editor-Cluster Synchronization Error Hierarchy
//!
//! Defines error types for the sync engine, categorized by the layer that
//! produces them: manifest decoding, cluster transport, and binding lifecycle.

use std::time::Duration;

use config::ConfigError;

use crate::cluster::WatchScope;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceVersion;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Manifest text could not be decoded into a resource identity
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Cluster-side failures (transport, versioning, authorization)
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Binding lifecycle violations
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Settings file / environment parsing failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Settings that parsed but fail validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Unrecoverable failures requiring engine shutdown
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Buffer content is not well-formed YAML
    #[error("Manifest is not valid YAML: {0}")]
    Parse(#[source] serde_yaml_with_quirks::Error),

    /// Buffer is empty or contains only null documents
    #[error("Manifest contains no document")]
    EmptyDocument,

    /// A binding targets exactly one object
    #[error("Expected a single YAML document, found {count}")]
    MultipleDocuments { count: usize },

    /// Document root must be a mapping to carry identity fields
    #[error("Manifest root is not a mapping")]
    NotAMapping,

    #[error("Manifest is missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("Manifest field `{field}` must not be empty")]
    EmptyField { field: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Object does not exist on the cluster
    #[error("Object not found: {identity}")]
    NotFound { identity: ResourceIdentity },

    /// Compare-and-swap write lost against a newer cluster version
    #[error("Version conflict on {identity}: submitted {expected}, cluster holds {current}")]
    Conflict {
        identity: ResourceIdentity,
        expected: ResourceVersion,
        current: ResourceVersion,
    },

    /// Cluster rejected the manifest content itself
    #[error("Cluster rejected manifest: {reason}")]
    Rejected { reason: String },

    /// Caller is not authorized for the scope; never retried
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transient transport failure; retried per backoff policy
    #[error("Connection failure: {0}")]
    Connection(String),

    /// Resume token fell outside the server's retention window
    #[error("Watch resume point expired for {scope}")]
    WatchExpired { scope: WatchScope },

    /// Single attempt exceeded the configured deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Retry policy exhaustion, wrapping the final attempt's failure
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<ClusterError>,
    },
}

impl ClusterError {
    /// Transient failures are worth retrying; everything else surfaces
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::Connection(_) | ClusterError::Timeout(_)
        )
    }

    /// Terminal authorization failures stop a watch connection without
    /// further reconnect attempts.
    pub fn is_permission(&self) -> bool {
        matches!(self, ClusterError::PermissionDenied(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// One binding per open buffer
    #[error("Buffer {buffer} already has an active binding")]
    AlreadyBound { buffer: u64 },

    /// Operation requires a completed bind
    #[error("Buffer is not bound to a cluster object")]
    NotBound,

    #[error("Binding is closed")]
    Closed,

    #[error("Operation `{op}` is not valid in phase {phase}")]
    IllegalOperation { op: &'static str, phase: &'static str },

    /// Binding task went away while a caller was waiting on it
    #[error("Binding task dropped the reply channel")]
    ReplyDropped,
}

// ============== Conversion Implementations ============== //

impl From<serde_yaml_with_quirks::Error> for Error {
    fn from(e: serde_yaml_with_quirks::Error) -> Self {
        Error::Manifest(ManifestError::Parse(e))
    }
}
