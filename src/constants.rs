// -
// Channel capacities

/// Per-subscription event queue between a watch connection and one listener
pub(crate) const DEFAULT_LISTENER_BUFFER: usize = 64;

/// Merged event queue between tree scope forwarders and the tree owner
pub(crate) const TREE_EVENT_BUFFER: usize = 256;

// -
// Manifest field names

pub(crate) const FIELD_API_VERSION: &str = "apiVersion";
pub(crate) const FIELD_KIND: &str = "kind";
pub(crate) const FIELD_METADATA: &str = "metadata";
pub(crate) const FIELD_NAME: &str = "name";
pub(crate) const FIELD_NAMESPACE: &str = "namespace";
pub(crate) const FIELD_UID: &str = "uid";
pub(crate) const FIELD_RESOURCE_VERSION: &str = "resourceVersion";

/// Kind of the namespace objects that form the first tree level
pub(crate) const NAMESPACE_KIND: &str = "Namespace";

// -
// Tree defaults

/// Kinds shown under each namespace folder when none are configured
pub(crate) const DEFAULT_KINDS: [&str; 5] =
    ["ConfigMap", "Deployment", "Pod", "Secret", "Service"];
