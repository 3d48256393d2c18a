//! Unit tests for the engine facade
//!
//! Covers:
//! - Binding registry: one live binding per buffer, seat reuse
//! - Notification fan-out through a host-shared hub
//! - Cluster context switching with live bindings
//! - Tree construction from settings
//! - Engine-wide shutdown, host-owned shutdown tokens

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::buffer::Buffer;
use crate::config::SyncSettings;
use crate::errors::BindingError;
use crate::errors::Error;
use crate::notify::NotificationHub;
use crate::notify::Severity;
use crate::sync::BindingHandle;
use crate::sync::ErrorReason;
use crate::sync::SyncPhase;
use crate::test_utils;
use crate::test_utils::FakeCluster;
use crate::test_utils::MemoryBuffer;

fn engine_over(fake: &Arc<FakeCluster>) -> SyncEngine {
    test_utils::enable_logger();
    EngineBuilder::from_settings(fake.handle("test"), SyncSettings::default()).build()
}

fn bind(
    engine: &SyncEngine,
    buffer: &Arc<MemoryBuffer>,
) -> Result<BindingHandle, Error> {
    engine.bind_buffer(Arc::clone(buffer) as Arc<dyn Buffer>)
}

async fn wait_phase(
    handle: &BindingHandle,
    want: SyncPhase,
) {
    let mut stream = handle.phase_stream();
    timeout(Duration::from_secs(2), async {
        loop {
            if *stream.borrow_and_update() == want {
                return;
            }
            if stream.changed().await.is_err() {
                assert_eq!(*stream.borrow(), want, "phase stream ended early");
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for phase {want}"));
}

async fn wait_until<F>(
    what: &str,
    predicate: F,
) where
    F: Fn() -> bool,
{
    timeout(Duration::from_secs(2), async {
        while !predicate() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

#[tokio::test]
async fn test_second_binding_for_same_buffer_is_rejected() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::manifest("Pod", "default", "web"));
    let engine = engine_over(&fake);
    let buffer = MemoryBuffer::new(9, &test_utils::manifest("Pod", "default", "web"));

    let first = bind(&engine, &buffer).expect("first bind");
    wait_phase(&first, SyncPhase::Synced).await;

    let error = bind(&engine, &buffer).expect_err("buffer is already bound");
    assert!(matches!(
        error,
        Error::Binding(BindingError::AlreadyBound { buffer: 9 })
    ));
    assert_eq!(engine.binding_count(), 1);
}

#[tokio::test]
async fn test_close_buffer_frees_the_seat() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::manifest("Pod", "default", "web"));
    let engine = engine_over(&fake);
    let buffer = MemoryBuffer::new(9, &test_utils::manifest("Pod", "default", "web"));

    let first = bind(&engine, &buffer).expect("first bind");
    wait_phase(&first, SyncPhase::Synced).await;

    assert!(engine.close_buffer(9));
    wait_phase(&first, SyncPhase::Closed).await;
    assert!(!engine.close_buffer(9), "seat is already free");

    let second = bind(&engine, &buffer).expect("rebind after close");
    wait_phase(&second, SyncPhase::Synced).await;
}

#[tokio::test]
async fn test_dropping_the_handle_frees_the_seat() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::manifest("Pod", "default", "web"));
    let engine = engine_over(&fake);
    let buffer = MemoryBuffer::new(9, &test_utils::manifest("Pod", "default", "web"));

    let first = bind(&engine, &buffer).expect("first bind");
    wait_phase(&first, SyncPhase::Synced).await;
    drop(first);

    // The seat frees as soon as the actor has observed the cancellation
    let second = timeout(Duration::from_secs(2), async {
        loop {
            match bind(&engine, &buffer) {
                Ok(handle) => return handle,
                Err(_) => sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .expect("timed out waiting for the dropped binding to finish");
    wait_phase(&second, SyncPhase::Synced).await;
}

#[tokio::test]
async fn test_notifications_merge_into_host_hub() {
    let fake = FakeCluster::new();
    let hub = Arc::new(NotificationHub::new());
    let mut notes = hub.subscribe();
    let engine = EngineBuilder::from_settings(fake.handle("test"), SyncSettings::default())
        .notifications(Arc::clone(&hub))
        .build();

    // Nothing was put on the cluster, so binding reports not-found
    let buffer = MemoryBuffer::new(3, &test_utils::manifest("Pod", "default", "web"));
    let handle = bind(&engine, &buffer).expect("bind");
    wait_phase(&handle, SyncPhase::Error(ErrorReason::NotFound)).await;

    let note = timeout(Duration::from_secs(1), notes.recv())
        .await
        .expect("notification expected")
        .expect("hub alive");
    assert_eq!(note.severity, Severity::Warning);
    assert_eq!(note.buffer, Some(3));
}

#[tokio::test]
async fn test_swap_cluster_redirects_bindings_and_watches() {
    let fake_a = FakeCluster::new();
    fake_a.put(&test_utils::manifest_with_marker("Pod", "default", "web", "from-a"));
    let fake_b = FakeCluster::new();
    fake_b.put(&test_utils::manifest_with_marker("Pod", "default", "web", "from-b"));

    test_utils::enable_logger();
    let engine =
        EngineBuilder::from_settings(fake_a.handle("dev"), SyncSettings::default()).build();
    assert_eq!(engine.cluster_context(), "dev");

    let buffer = MemoryBuffer::new(1, &test_utils::manifest("Pod", "default", "web"));
    let handle = bind(&engine, &buffer).expect("bind");
    wait_phase(&handle, SyncPhase::Synced).await;
    assert!(buffer.text().contains("from-a"));

    engine.swap_cluster(fake_b.handle("staging"));
    assert_eq!(engine.cluster_context(), "staging");

    // Reads now land on the new cluster
    handle.pull().await.expect("pull from new cluster");
    assert!(buffer.text().contains("from-b"));

    // Watches reconnected there too: a change on the new cluster reaches
    // the binding
    wait_until("watch reattaches", || fake_b.watch_calls() >= 1).await;
    fake_b.put(&test_utils::manifest_with_marker("Pod", "default", "web", "staging-edit"));
    wait_until("buffer follows the new cluster", || {
        buffer.text().contains("staging-edit")
    })
    .await;
    assert_eq!(handle.phase(), SyncPhase::Synced);
}

#[tokio::test]
async fn test_tree_follows_configured_kinds() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::namespace_manifest("default"));
    let mut settings = SyncSettings::default();
    settings.engine.kinds = vec!["ConfigMap".to_string()];

    test_utils::enable_logger();
    let engine = EngineBuilder::from_settings(fake.handle("test"), settings).build();
    let mut tree = engine.tree();

    let namespaces = tree.expand(tree.root()).await.expect("expand root");
    assert_eq!(namespaces.len(), 1);

    let folders = tree.expand(namespaces[0]).await.expect("expand namespace");
    let labels: Vec<&str> = folders
        .iter()
        .filter_map(|id| tree.node(*id))
        .map(|node| node.label.as_str())
        .collect();
    assert_eq!(labels, ["ConfigMap"]);
}

#[tokio::test]
async fn test_shutdown_closes_all_bindings() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::manifest("Pod", "default", "web"));
    fake.put(&test_utils::manifest("Pod", "default", "api"));
    let engine = engine_over(&fake);

    let web = MemoryBuffer::new(1, &test_utils::manifest("Pod", "default", "web"));
    let api = MemoryBuffer::new(2, &test_utils::manifest("Pod", "default", "api"));
    let web_handle = bind(&engine, &web).expect("bind web");
    let api_handle = bind(&engine, &api).expect("bind api");
    wait_phase(&web_handle, SyncPhase::Synced).await;
    wait_phase(&api_handle, SyncPhase::Synced).await;

    engine.shutdown();

    wait_phase(&web_handle, SyncPhase::Closed).await;
    wait_phase(&api_handle, SyncPhase::Closed).await;
    assert_eq!(engine.binding_count(), 0);
}

#[tokio::test]
async fn test_host_shutdown_token_closes_the_engine() {
    let fake = FakeCluster::new();
    fake.put(&test_utils::manifest("Pod", "default", "web"));
    let token = CancellationToken::new();

    test_utils::enable_logger();
    let engine = EngineBuilder::from_settings(fake.handle("test"), SyncSettings::default())
        .shutdown_token(token.clone())
        .build();

    let buffer = MemoryBuffer::new(5, &test_utils::manifest("Pod", "default", "web"));
    let handle = bind(&engine, &buffer).expect("bind");
    wait_phase(&handle, SyncPhase::Synced).await;

    token.cancel();
    wait_phase(&handle, SyncPhase::Closed).await;
}
