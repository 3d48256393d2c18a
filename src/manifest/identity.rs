use std::fmt;

/// Opaque cluster version token.
///
/// Compared only for equality; the engine never orders, parses, or
/// arithmetically derives version tokens. Only values handed out by the
/// cluster (reads, writes, watch events) are ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(token: impl Into<String>) -> Self {
        ResourceVersion(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(token: &str) -> Self {
        ResourceVersion(token.to_string())
    }
}

/// Logical object key: two identities denote the same cluster object iff
/// their keys are equal. Version and uid never participate in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Identity of one cluster object as declared by a manifest or returned by
/// the cluster.
///
/// `uid` and `resource_version` are observational: they describe the
/// incarnation and revision last seen, not the logical object. Use
/// [`ResourceIdentity::key`] wherever identity equality matters.
#[derive(Debug, Clone)]
pub struct ResourceIdentity {
    /// Group and version in `group/version` form, or bare `version` for the
    /// core group.
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Server-assigned instance id, if the manifest has been on a cluster.
    pub uid: Option<String>,
    /// Revision last seen for this object, if any.
    pub resource_version: Option<ResourceVersion>,
}

impl ResourceIdentity {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// API group, empty for the core group.
    pub fn group(&self) -> &str {
        split_api_version(&self.api_version).0
    }

    /// API version without the group prefix.
    pub fn version(&self) -> &str {
        split_api_version(&self.api_version).1
    }

    /// Same logical object, regardless of version or incarnation.
    pub fn same_object(
        &self,
        other: &ResourceIdentity,
    ) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }

    pub fn with_version(
        mut self,
        version: ResourceVersion,
    ) -> Self {
        self.resource_version = Some(version);
        self
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Split an `apiVersion` value into `(group, version)`.
///
/// `"apps/v1"` yields `("apps", "v1")`; a bare `"v1"` belongs to the core
/// group and yields `("", "v1")`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
