//! In-memory cluster fake with scriptable failure injection.
//!
//! Behaves like a tiny API server: objects live in a versioned store,
//! mutations broadcast watch events to matching watchers, writes are
//! compare-and-swap. Tests script failures per operation to exercise retry,
//! reconnect, resync and permission paths.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cluster::ClusterApi;
use crate::cluster::ClusterHandle;
use crate::cluster::ResourceSnapshot;
use crate::cluster::WatchEvent;
use crate::cluster::WatchEventKind;
use crate::cluster::WatchScope;
use crate::cluster::WatchStream;
use crate::errors::ClusterError;
use crate::manifest::parse_identity;
use crate::manifest::set_resource_version;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceKey;
use crate::manifest::ResourceVersion;

struct StoredObject {
    identity: ResourceIdentity,
    content: Bytes,
}

struct FakeWatcher {
    scope: WatchScope,
    tx: mpsc::UnboundedSender<Result<WatchEvent, ClusterError>>,
}

#[derive(Default)]
struct FailureScript {
    gets: VecDeque<ClusterError>,
    lists: VecDeque<ClusterError>,
    updates: VecDeque<ClusterError>,
    creates: VecDeque<ClusterError>,
}

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceKey, StoredObject>>,
    version_counter: AtomicU64,
    watchers: Mutex<Vec<FakeWatcher>>,
    watch_calls: AtomicUsize,
    list_calls: AtomicUsize,
    fail_watch_connects: AtomicUsize,
    expire_resume: AtomicBool,
    denied_scopes: Mutex<HashSet<WatchScope>>,
    failures: Mutex<FailureScript>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeCluster::default())
    }

    pub fn handle(
        self: &Arc<Self>,
        context: &str,
    ) -> ClusterHandle {
        ClusterHandle::new(context, Arc::clone(self) as Arc<dyn ClusterApi>)
    }

    /// Store a manifest as the cluster would: assign the next version, stamp
    /// it into the text, broadcast Added or Modified.
    pub fn put(
        &self,
        manifest_text: &str,
    ) -> ResourceIdentity {
        let parsed = parse_identity(manifest_text).expect("fixture manifest must parse");
        let version = self.next_version();
        let stamped = set_resource_version(manifest_text, &version)
            .expect("fixture manifest must re-render");
        let identity = parsed.with_version(version);
        let key = identity.key();

        let kind = {
            let mut objects = self.objects.lock();
            let existed = objects.contains_key(&key);
            objects.insert(
                key,
                StoredObject {
                    identity: identity.clone(),
                    content: Bytes::from(stamped),
                },
            );
            if existed {
                WatchEventKind::Modified
            } else {
                WatchEventKind::Added
            }
        };

        self.emit_for(&identity, kind);
        identity
    }

    /// Delete an object, broadcasting its final state.
    pub fn remove(
        &self,
        key: &ResourceKey,
    ) -> bool {
        let removed = self.objects.lock().remove(key);
        match removed {
            Some(stored) => {
                self.emit(WatchEvent {
                    kind: WatchEventKind::Deleted,
                    snapshot: ResourceSnapshot::new(stored.identity, stored.content),
                });
                true
            }
            None => false,
        }
    }

    pub fn version_of(
        &self,
        key: &ResourceKey,
    ) -> Option<ResourceVersion> {
        self.objects
            .lock()
            .get(key)
            .and_then(|o| o.identity.resource_version.clone())
    }

    pub fn content_of(
        &self,
        key: &ResourceKey,
    ) -> Option<String> {
        self.objects
            .lock()
            .get(key)
            .map(|o| String::from_utf8_lossy(&o.content).to_string())
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// How many watch streams were requested, reconnects included.
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// How many list calls landed on the store.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` watch connection attempts fail with a transient
    /// error.
    pub fn fail_next_watch_connects(
        &self,
        n: usize,
    ) {
        self.fail_watch_connects.store(n, Ordering::SeqCst);
    }

    /// Reject watch requests that carry a resume token, as a server with an
    /// exhausted retention window would.
    pub fn set_expire_resume(
        &self,
        on: bool,
    ) {
        self.expire_resume.store(on, Ordering::SeqCst);
    }

    /// Deny list and watch access to a scope.
    pub fn deny_scope(
        &self,
        scope: WatchScope,
    ) {
        self.denied_scopes.lock().insert(scope);
    }

    pub fn fail_next_get(
        &self,
        error: ClusterError,
    ) {
        self.failures.lock().gets.push_back(error);
    }

    pub fn fail_next_list(
        &self,
        error: ClusterError,
    ) {
        self.failures.lock().lists.push_back(error);
    }

    pub fn fail_next_update(
        &self,
        error: ClusterError,
    ) {
        self.failures.lock().updates.push_back(error);
    }

    pub fn fail_next_create(
        &self,
        error: ClusterError,
    ) {
        self.failures.lock().creates.push_back(error);
    }

    /// Kill every live stream with a transient error, forcing reconnects.
    pub fn break_streams(&self) {
        let watchers = std::mem::take(&mut *self.watchers.lock());
        for watcher in watchers {
            let _ = watcher
                .tx
                .send(Err(ClusterError::Connection("stream reset".to_string())));
        }
    }

    fn next_version(&self) -> ResourceVersion {
        let n = self.version_counter.fetch_add(1, Ordering::SeqCst) + 1;
        ResourceVersion::new(n.to_string())
    }

    fn emit_for(
        &self,
        identity: &ResourceIdentity,
        kind: WatchEventKind,
    ) {
        let snapshot = {
            let objects = self.objects.lock();
            let stored = &objects[&identity.key()];
            ResourceSnapshot::new(stored.identity.clone(), stored.content.clone())
        };
        self.emit(WatchEvent { kind, snapshot });
    }

    fn emit(
        &self,
        event: WatchEvent,
    ) {
        self.watchers.lock().retain(|watcher| {
            if !watcher.scope.matches(event.identity()) {
                return true;
            }
            watcher.tx.send(Ok(event.clone())).is_ok()
        });
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<ResourceSnapshot, ClusterError> {
        if let Some(error) = self.failures.lock().gets.pop_front() {
            return Err(error);
        }
        let objects = self.objects.lock();
        match objects.get(&identity.key()) {
            Some(stored) => Ok(ResourceSnapshot::new(
                stored.identity.clone(),
                stored.content.clone(),
            )),
            None => Err(ClusterError::NotFound {
                identity: identity.clone(),
            }),
        }
    }

    async fn list(
        &self,
        scope: &WatchScope,
    ) -> Result<Vec<ResourceSnapshot>, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().lists.pop_front() {
            return Err(error);
        }
        if self.denied_scopes.lock().contains(scope) {
            return Err(ClusterError::PermissionDenied(format!(
                "list forbidden for {scope}"
            )));
        }
        let objects = self.objects.lock();
        Ok(objects
            .values()
            .filter(|stored| scope.matches(&stored.identity))
            .map(|stored| ResourceSnapshot::new(stored.identity.clone(), stored.content.clone()))
            .collect())
    }

    async fn watch(
        &self,
        scope: &WatchScope,
        resume_from: Option<ResourceVersion>,
    ) -> Result<WatchStream, ClusterError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_watch_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterError::Connection("connect refused".to_string()));
        }
        if self.denied_scopes.lock().contains(scope) {
            return Err(ClusterError::PermissionDenied(format!(
                "watch forbidden for {scope}"
            )));
        }
        if resume_from.is_some() && self.expire_resume.load(Ordering::SeqCst) {
            return Err(ClusterError::WatchExpired {
                scope: scope.clone(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(FakeWatcher {
            scope: scope.clone(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn update(
        &self,
        identity: &ResourceIdentity,
        content: Bytes,
        expected: Option<&ResourceVersion>,
    ) -> Result<ResourceVersion, ClusterError> {
        if let Some(error) = self.failures.lock().updates.pop_front() {
            return Err(error);
        }

        let new_version = self.next_version();
        let updated = {
            let mut objects = self.objects.lock();
            let stored = objects
                .get_mut(&identity.key())
                .ok_or_else(|| ClusterError::NotFound {
                    identity: identity.clone(),
                })?;

            if let Some(expected) = expected {
                let current = stored
                    .identity
                    .resource_version
                    .clone()
                    .unwrap_or_else(|| ResourceVersion::new(""));
                if &current != expected {
                    return Err(ClusterError::Conflict {
                        identity: stored.identity.clone(),
                        expected: expected.clone(),
                        current,
                    });
                }
            }

            let text = String::from_utf8_lossy(&content);
            let stamped =
                set_resource_version(&text, &new_version).map_err(|e| ClusterError::Rejected {
                    reason: e.to_string(),
                })?;
            stored.identity = stored.identity.clone().with_version(new_version.clone());
            stored.content = Bytes::from(stamped);
            stored.identity.clone()
        };

        self.emit_for(&updated, WatchEventKind::Modified);
        Ok(new_version)
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        content: Bytes,
    ) -> Result<ResourceVersion, ClusterError> {
        if let Some(error) = self.failures.lock().creates.pop_front() {
            return Err(error);
        }

        let version = self.next_version();
        let created = {
            let mut objects = self.objects.lock();
            if objects.contains_key(&identity.key()) {
                return Err(ClusterError::Rejected {
                    reason: format!("{identity} already exists"),
                });
            }

            let text = String::from_utf8_lossy(&content);
            let stamped =
                set_resource_version(&text, &version).map_err(|e| ClusterError::Rejected {
                    reason: e.to_string(),
                })?;
            let stored_identity = identity.clone().with_version(version.clone());
            objects.insert(
                identity.key(),
                StoredObject {
                    identity: stored_identity.clone(),
                    content: Bytes::from(stamped),
                },
            );
            stored_identity
        };

        self.emit_for(&created, WatchEventKind::Added);
        Ok(version)
    }
}
