use crate::manifest::ResourceIdentity;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

fn api_version_for(kind: &str) -> &'static str {
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" => "apps/v1",
        "Job" | "CronJob" => "batch/v1",
        _ => "v1",
    }
}

/// Identity fixture without version or uid.
pub fn identity(
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> ResourceIdentity {
    ResourceIdentity {
        api_version: api_version_for(kind).to_string(),
        kind: kind.to_string(),
        namespace: namespace.map(|s| s.to_string()),
        name: name.to_string(),
        uid: None,
        resource_version: None,
    }
}

/// Minimal manifest text for a namespaced object.
pub fn manifest(
    kind: &str,
    namespace: &str,
    name: &str,
) -> String {
    manifest_with_marker(kind, namespace, name, "initial")
}

/// Manifest text with a recognizable payload, so edits are visible in
/// content comparisons.
pub fn manifest_with_marker(
    kind: &str,
    namespace: &str,
    name: &str,
    marker: &str,
) -> String {
    format!(
        "apiVersion: {}\nkind: {kind}\nmetadata:\n  name: {name}\n  namespace: {namespace}\nspec:\n  marker: {marker}\n",
        api_version_for(kind)
    )
}

/// Manifest text for a cluster-scoped namespace object.
pub fn namespace_manifest(name: &str) -> String {
    format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n")
}
