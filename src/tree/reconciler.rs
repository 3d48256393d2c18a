use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::node::ChildState;
use super::node::NodeId;
use super::node::NodeKind;
use super::node::TreeNode;
use crate::cluster::ResourceSnapshot;
use crate::cluster::SharedCluster;
use crate::cluster::WatchEvent;
use crate::cluster::WatchEventKind;
use crate::cluster::WatchScope;
use crate::config::BackoffPolicy;
use crate::constants::NAMESPACE_KIND;
use crate::constants::TREE_EVENT_BUFFER;
use crate::errors::Error;
use crate::manifest::ResourceKey;
use crate::utils::retry_cluster_op;
use crate::watch::WatchHub;

/// Watch feed attached to one fetch scope; cancelling stops the forwarder
/// task, which in turn drops its hub subscription.
struct ScopeFeed {
    cancel: CancellationToken,
}

enum ExpandStep {
    Ready(Vec<NodeId>),
    Fetch { scope: WatchScope, epoch: u64 },
}

/// Hierarchical cache of cluster objects, populated on demand and kept
/// current by watch events.
///
/// Layout is `Root -> Namespace -> KindFolder -> Resource`; the kind folders
/// come from configuration. Children are fetched when a node is first
/// expanded and then maintained incrementally, so an already-loaded folder
/// never re-lists just because a sibling changed.
///
/// The tree is single-owner: every mutation goes through `&mut self`, and
/// watch events are applied only when the owner pumps them via
/// [`next_change`](ResourceTree::next_change) or
/// [`drain_pending`](ResourceTree::drain_pending). Background tasks touch
/// nothing but the event channel.
pub struct ResourceTree {
    cluster: SharedCluster,
    hub: WatchHub,
    kinds: Vec<String>,
    retry: BackoffPolicy,
    nodes: Vec<Option<TreeNode>>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Resource and namespace nodes by logical object, for event application
    /// and removal without positional lookups.
    index: HashMap<ResourceKey, Vec<NodeId>>,
    /// Nodes that own a fetch scope (the root and every kind folder).
    folders: HashMap<WatchScope, NodeId>,
    feeds: HashMap<WatchScope, ScopeFeed>,
    /// Taken on shutdown so the merge channel can reach end-of-stream.
    events_tx: Option<mpsc::Sender<WatchEvent>>,
    events: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
}

impl ResourceTree {
    pub(crate) fn new(
        cluster: SharedCluster,
        hub: WatchHub,
        kinds: Vec<String>,
        retry: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(TREE_EVENT_BUFFER);
        let label = cluster.load().context().to_string();
        let root = 0;

        let mut kinds = kinds;
        kinds.sort();
        kinds.dedup();

        let mut folders = HashMap::new();
        folders.insert(WatchScope::all_namespaces(NAMESPACE_KIND), root);

        ResourceTree {
            cluster,
            hub,
            kinds,
            retry,
            nodes: vec![Some(TreeNode::new(label, NodeKind::Root, None))],
            free: Vec::new(),
            root,
            index: HashMap::new(),
            folders,
            feeds: HashMap::new(),
            events_tx: Some(events_tx),
            events,
            cancel,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(
        &self,
        id: NodeId,
    ) -> Option<&TreeNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    /// Cached children of a node, `None` until it has been expanded.
    pub fn children(
        &self,
        id: NodeId,
    ) -> Option<&[NodeId]> {
        self.node(id).and_then(TreeNode::loaded_children)
    }

    /// Every node currently standing for the given object.
    pub fn find(
        &self,
        key: &ResourceKey,
    ) -> &[NodeId] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Live nodes in the arena (diagnostics and tests).
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    // ---------------------------------------------
    // Expansion
    // ---------------------------------------------

    /// Return a node's children, fetching them on first expansion.
    ///
    /// Cached children are returned as-is; otherwise the node's scope is
    /// listed from the cluster (with transient-failure retry), the children
    /// are materialized in name order and the node's scope is subscribed so
    /// later changes arrive incrementally. A refresh that lands while the
    /// fetch is in flight invalidates the result and the listing is redone
    /// under the new epoch.
    ///
    /// Expanding a node that has disappeared meanwhile yields an empty list.
    pub async fn expand(
        &mut self,
        id: NodeId,
    ) -> Result<Vec<NodeId>, Error> {
        loop {
            let (scope, epoch) = match self.begin_expand(id) {
                ExpandStep::Ready(children) => return Ok(children),
                ExpandStep::Fetch { scope, epoch } => (scope, epoch),
            };

            // Subscribe before listing: changes that race the list queue up
            // and reconcile against the fresh cache when pumped
            self.ensure_feed(&scope);

            let api = self.cluster.load().api();
            let listed = retry_cluster_op("tree_list", &self.retry, || {
                let api = Arc::clone(&api);
                let scope = scope.clone();
                async move { api.list(&scope).await }
            })
            .await?;

            if let Some(children) = self.apply_listing(id, epoch, listed) {
                return Ok(children);
            }
            debug!(node = id, "listing superseded by refresh, fetching again");
        }
    }

    fn begin_expand(
        &mut self,
        id: NodeId,
    ) -> ExpandStep {
        enum Pending {
            Scoped(WatchScope),
            Namespace(String),
            Leaf,
        }

        let (pending, epoch) = match self.node(id) {
            Some(node) => {
                if let Some(children) = node.loaded_children() {
                    return ExpandStep::Ready(children.to_vec());
                }
                let pending = match &node.kind {
                    NodeKind::Root => {
                        Pending::Scoped(WatchScope::all_namespaces(NAMESPACE_KIND))
                    }
                    NodeKind::KindFolder { scope } => Pending::Scoped(scope.clone()),
                    NodeKind::Namespace { name } => Pending::Namespace(name.clone()),
                    NodeKind::Resource { .. } => Pending::Leaf,
                };
                (pending, node.epoch)
            }
            None => {
                debug!(node = id, "expand on a removed node");
                return ExpandStep::Ready(Vec::new());
            }
        };

        match pending {
            Pending::Scoped(scope) => {
                self.mark_loading(id, epoch);
                ExpandStep::Fetch { scope, epoch }
            }
            // Kind folders are configuration, not cluster state
            Pending::Namespace(name) => ExpandStep::Ready(self.populate_folders(id, &name)),
            Pending::Leaf => ExpandStep::Ready(Vec::new()),
        }
    }

    fn mark_loading(
        &mut self,
        id: NodeId,
        epoch: u64,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.children = ChildState::Loading { epoch };
        }
    }

    fn populate_folders(
        &mut self,
        id: NodeId,
        namespace: &str,
    ) -> Vec<NodeId> {
        let kinds = self.kinds.clone();
        let mut children = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let scope = WatchScope::namespaced(kind.clone(), namespace);
            let folder = self.alloc(TreeNode::new(
                kind,
                NodeKind::KindFolder {
                    scope: scope.clone(),
                },
                Some(id),
            ));
            self.folders.insert(scope, folder);
            children.push(folder);
        }
        if let Some(node) = self.node_mut(id) {
            let epoch = node.epoch;
            node.children = ChildState::Loaded {
                epoch,
                children: children.clone(),
            };
        }
        children
    }

    /// Install a completed listing, unless the node was refreshed or removed
    /// while the list call was in flight.
    fn apply_listing(
        &mut self,
        id: NodeId,
        epoch: u64,
        mut listed: Vec<ResourceSnapshot>,
    ) -> Option<Vec<NodeId>> {
        let under_root = match self.node(id) {
            Some(node) if node.epoch == epoch => matches!(node.kind, NodeKind::Root),
            _ => return None,
        };

        listed.sort_by(|a, b| a.identity.name.cmp(&b.identity.name));

        let mut children = Vec::with_capacity(listed.len());
        for snapshot in listed {
            let key = snapshot.identity.key();
            let label = snapshot.identity.name.clone();
            let kind = if under_root {
                NodeKind::Namespace { name: label.clone() }
            } else {
                NodeKind::Resource { snapshot }
            };
            let child = self.alloc(TreeNode::new(label, kind, Some(id)));
            self.index.entry(key).or_default().push(child);
            children.push(child);
        }

        if let Some(node) = self.node_mut(id) {
            node.children = ChildState::Loaded {
                epoch,
                children: children.clone(),
            };
        }
        Some(children)
    }

    /// Invalidate a node's cache so the next expansion re-fetches.
    ///
    /// The cached subtree is dropped immediately; watch feeds for scopes that
    /// fall away are closed. An in-flight expansion of this node discards its
    /// result.
    pub fn refresh(
        &mut self,
        id: NodeId,
    ) {
        let old = match self.node_mut(id) {
            Some(node) => {
                node.epoch += 1;
                std::mem::replace(&mut node.children, ChildState::NotLoaded)
            }
            None => return,
        };
        if let ChildState::Loaded { children, .. } = old {
            for child in children {
                self.remove_subtree(child);
            }
        }
        debug!(node = id, "cache invalidated");
    }

    // ---------------------------------------------
    // Watch-driven reconciliation
    // ---------------------------------------------

    /// Wait for the next watch-driven change and apply it.
    ///
    /// Returns `false` once the tree has been shut down and the feed is
    /// drained.
    pub async fn next_change(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply every change already queued, without waiting. Returns how many
    /// were applied.
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    /// Fold one watch event into the cache.
    ///
    /// Added inserts into the matching loaded folder at the name-sorted
    /// position (an unloaded folder ignores it and lists on first expand;
    /// a duplicate refreshes the stored snapshot). Modified replaces the
    /// snapshot wherever the object is cached. Deleted drops every node
    /// standing for the object, subtrees included.
    pub fn apply_event(
        &mut self,
        event: WatchEvent,
    ) {
        match event.kind {
            WatchEventKind::Added => self.apply_added(event.snapshot),
            WatchEventKind::Modified => self.apply_modified(event.snapshot),
            WatchEventKind::Deleted => self.remove_object(&event.snapshot.identity.key()),
        }
    }

    fn apply_added(
        &mut self,
        snapshot: ResourceSnapshot,
    ) {
        let scope = WatchScope::of(&snapshot.identity);
        let parent = match self.folders.get(&scope) {
            Some(&parent) => parent,
            None => {
                trace!(scope = %scope, "added object has no folder here");
                return;
            }
        };
        if !self.node(parent).is_some_and(TreeNode::is_loaded) {
            trace!(scope = %scope, "folder not loaded, deferring to first expand");
            return;
        }

        let key = snapshot.identity.key();
        let existing = self.index.get(&key).and_then(|ids| {
            ids.iter()
                .copied()
                .find(|&id| self.parent_of(id) == Some(parent))
        });
        if let Some(id) = existing {
            self.replace_snapshot(id, snapshot);
            return;
        }

        let label = snapshot.identity.name.clone();
        let kind = match self.node(parent).map(|n| &n.kind) {
            Some(NodeKind::Root) => NodeKind::Namespace { name: label.clone() },
            _ => NodeKind::Resource { snapshot },
        };
        let child = self.alloc(TreeNode::new(label, kind, Some(parent)));
        self.index.entry(key).or_default().push(child);
        self.insert_sorted(parent, child);
    }

    fn apply_modified(
        &mut self,
        snapshot: ResourceSnapshot,
    ) {
        let ids = match self.index.get(&snapshot.identity.key()) {
            Some(ids) => ids.clone(),
            None => return,
        };
        for id in ids {
            self.replace_snapshot(id, snapshot.clone());
        }
    }

    fn replace_snapshot(
        &mut self,
        id: NodeId,
        snapshot: ResourceSnapshot,
    ) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Resource { snapshot: slot } = &mut node.kind {
                *slot = snapshot;
            }
        }
    }

    /// Remove every node standing for an object, keeping sibling order and
    /// unrelated caches intact.
    fn remove_object(
        &mut self,
        key: &ResourceKey,
    ) {
        let ids = match self.index.remove(key) {
            Some(ids) => ids,
            None => {
                trace!(object = %key, "deleted object was not cached");
                return;
            }
        };
        for id in ids {
            self.unlink_from_parent(id);
            self.remove_subtree(id);
        }
        debug!(object = %key, "removed from tree");
    }

    fn insert_sorted(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) {
        let label = match self.node(child) {
            Some(node) => node.label.clone(),
            None => return,
        };
        let position = match self.node(parent).and_then(TreeNode::loaded_children) {
            Some(siblings) => siblings
                .iter()
                .position(|&sibling| {
                    self.node(sibling)
                        .is_some_and(|node| node.label.as_str() > label.as_str())
                })
                .unwrap_or(siblings.len()),
            None => return,
        };
        if let Some(node) = self.node_mut(parent) {
            if let ChildState::Loaded { children, .. } = &mut node.children {
                children.insert(position, child);
            }
        }
    }

    fn unlink_from_parent(
        &mut self,
        id: NodeId,
    ) {
        let parent = match self.parent_of(id) {
            Some(parent) => parent,
            None => return,
        };
        if let Some(node) = self.node_mut(parent) {
            if let ChildState::Loaded { children, .. } = &mut node.children {
                children.retain(|&c| c != id);
            }
        }
    }

    /// Release a node and everything under it; folder scopes lose their
    /// watch feed, indexed objects their entries.
    fn remove_subtree(
        &mut self,
        id: NodeId,
    ) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = match self.release(current) {
                Some(node) => node,
                None => continue,
            };
            if let ChildState::Loaded { children, .. } = node.children {
                stack.extend(children);
            }
            match node.kind {
                NodeKind::KindFolder { scope } => {
                    self.folders.remove(&scope);
                    if let Some(feed) = self.feeds.remove(&scope) {
                        feed.cancel.cancel();
                    }
                }
                NodeKind::Resource { snapshot } => {
                    self.unindex(&snapshot.identity.key(), current);
                }
                NodeKind::Namespace { name } => {
                    let key = ResourceKey {
                        kind: NAMESPACE_KIND.to_string(),
                        namespace: None,
                        name,
                    };
                    self.unindex(&key, current);
                }
                NodeKind::Root => {}
            }
        }
    }

    // ---------------------------------------------
    // Feeds and lifecycle
    // ---------------------------------------------

    /// Forward a scope's watch events into the tree's merge channel. One
    /// feed per scope; lives until the scope's folder goes away or the tree
    /// shuts down.
    fn ensure_feed(
        &mut self,
        scope: &WatchScope,
    ) {
        if self.feeds.contains_key(scope) {
            return;
        }
        let tx = match &self.events_tx {
            Some(tx) => tx.clone(),
            None => return,
        };

        let mut subscription = self.hub.subscribe(scope.clone());
        let cancel = self.cancel.child_token();
        let feed = ScopeFeed {
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.feeds.insert(scope.clone(), feed);
        debug!(scope = %scope, "watch feed attached");
    }

    /// Stop all feeds; queued events can still be drained, after which
    /// [`next_change`](ResourceTree::next_change) reports the end.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.feeds.clear();
        self.events_tx = None;
    }

    // ---------------------------------------------
    // Arena plumbing
    // ---------------------------------------------

    fn node_mut(
        &mut self,
        id: NodeId,
    ) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    fn parent_of(
        &self,
        id: NodeId,
    ) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    fn alloc(
        &mut self,
        node: TreeNode,
    ) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(
        &mut self,
        id: NodeId,
    ) -> Option<TreeNode> {
        let node = self.nodes.get_mut(id).and_then(Option::take)?;
        self.free.push(id);
        Some(node)
    }

    fn unindex(
        &mut self,
        key: &ResourceKey,
        id: NodeId,
    ) {
        if let Some(ids) = self.index.get_mut(key) {
            ids.retain(|&n| n != id);
            if ids.is_empty() {
                self.index.remove(key);
            }
        }
    }
}

impl Drop for ResourceTree {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
