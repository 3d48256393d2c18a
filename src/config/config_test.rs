use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::errors::Error;

fn cleanup_all_kubesync_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("KUBESYNC__") {
            std::env::remove_var(&key);
        }
    }
}

#[test]
fn test_defaults_are_valid() {
    let settings = SyncSettings::default();

    assert!(settings.validate().is_ok());
    assert_eq!(settings.engine.kinds.len(), 5);
    assert!(settings.engine.kinds.iter().any(|k| k == "Pod"));
    assert!(settings.watch.resync_on_expired);
    assert_eq!(settings.retry.cluster_ops.max_retries, 3);
    assert_eq!(settings.retry.watch_reconnect.max_retries, 8);
}

#[test]
#[serial]
fn test_load_without_sources_yields_defaults() {
    cleanup_all_kubesync_env_vars();
    let settings = SyncSettings::load(None).unwrap();

    assert_eq!(settings.watch.listener_buffer, 64);
    assert!(settings.engine.notify_auto_refresh);
}

#[test]
#[serial]
fn test_load_explicit_file() {
    cleanup_all_kubesync_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(
        &path,
        r#"
[engine]
kinds = ["Pod", "Job"]

[watch]
listener_buffer = 16

[retry.cluster_ops]
max_retries = 7
"#,
    )
    .unwrap();

    let settings = SyncSettings::load(path.to_str()).unwrap();

    assert_eq!(settings.engine.kinds, vec!["Pod", "Job"]);
    assert_eq!(settings.watch.listener_buffer, 16);
    assert_eq!(settings.retry.cluster_ops.max_retries, 7);
    // Untouched sections keep their defaults
    assert_eq!(settings.retry.watch_reconnect.max_retries, 8);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    cleanup_all_kubesync_env_vars();
    let result = SyncSettings::load(Some("/definitely/not/here/settings.toml"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    cleanup_all_kubesync_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "[watch]\nlistener_buffer = 16\n").unwrap();

    with_vars(vec![("KUBESYNC__WATCH__LISTENER_BUFFER", Some("128"))], || {
        let settings = SyncSettings::load(path.to_str()).unwrap();
        assert_eq!(settings.watch.listener_buffer, 128);
    });
}

#[test]
#[serial]
fn test_rejects_zero_listener_buffer() {
    cleanup_all_kubesync_env_vars();
    with_vars(vec![("KUBESYNC__WATCH__LISTENER_BUFFER", Some("0"))], || {
        let result = SyncSettings::load(None);
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    });
}

#[test]
fn test_rejects_inverted_backoff_bounds() {
    let mut settings = SyncSettings::default();
    settings.retry.cluster_ops.base_delay_ms = 5000;
    settings.retry.cluster_ops.max_delay_ms = 100;

    let err = settings.validate().unwrap_err();
    assert!(matches!(err, Error::InvalidSettings(msg) if msg.contains("cluster_ops")));
}

#[test]
fn test_rejects_empty_kind_list() {
    let mut settings = SyncSettings::default();
    settings.engine.kinds.clear();

    assert!(matches!(
        settings.validate(),
        Err(Error::InvalidSettings(_))
    ));
}

#[test]
fn test_rejects_zero_retries() {
    let mut settings = SyncSettings::default();
    settings.retry.watch_reconnect.max_retries = 0;

    let err = settings.validate().unwrap_err();
    assert!(matches!(err, Error::InvalidSettings(msg) if msg.contains("watch_reconnect")));
}
