use crate::cluster::ResourceSnapshot;
use crate::cluster::WatchScope;
use crate::manifest::ResourceIdentity;

/// Arena index of a tree node.
///
/// Ids are stable for the lifetime of the node but slots are recycled after
/// removal, so holding an id across mutations requires re-checking it via
/// [`crate::tree::ResourceTree::node`]. Logical identity of resource nodes is
/// their [`ResourceIdentity`], never the id.
pub type NodeId = usize;

/// What a node represents.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The cluster itself; children are namespaces.
    Root,
    /// One namespace; children are the configured kind folders.
    Namespace { name: String },
    /// All objects of one kind inside one namespace; children are resources.
    KindFolder { scope: WatchScope },
    /// A single object, carrying its last observed manifest.
    Resource { snapshot: ResourceSnapshot },
}

/// Lazy child population status.
#[derive(Debug, Clone)]
pub(crate) enum ChildState {
    NotLoaded,
    /// A list call is in flight; `epoch` pins the invalidation generation it
    /// was issued under so a refresh that lands mid-fetch discards the
    /// result.
    Loading { epoch: u64 },
    Loaded { epoch: u64, children: Vec<NodeId> },
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub label: String,
    pub kind: NodeKind,
    /// Back-reference for unlinking; never used for traversal ownership.
    pub parent: Option<NodeId>,
    /// Invalidation generation. Bumped by refresh; a cached child list is
    /// only valid for the epoch it was fetched under.
    pub(crate) epoch: u64,
    pub(crate) children: ChildState,
}

impl TreeNode {
    pub(crate) fn new(
        label: impl Into<String>,
        kind: NodeKind,
        parent: Option<NodeId>,
    ) -> Self {
        TreeNode {
            label: label.into(),
            kind,
            parent,
            epoch: 0,
            children: ChildState::NotLoaded,
        }
    }

    /// The object this node stands for, when it is a resource node.
    pub fn identity(&self) -> Option<&ResourceIdentity> {
        match &self.kind {
            NodeKind::Resource { snapshot } => Some(&snapshot.identity),
            _ => None,
        }
    }

    /// Last observed manifest for resource nodes.
    pub fn snapshot(&self) -> Option<&ResourceSnapshot> {
        match &self.kind {
            NodeKind::Resource { snapshot } => Some(snapshot),
            _ => None,
        }
    }

    /// Whether the child cache is populated and current.
    pub fn is_loaded(&self) -> bool {
        matches!(&self.children, ChildState::Loaded { epoch, .. } if *epoch == self.epoch)
    }

    pub(crate) fn loaded_children(&self) -> Option<&[NodeId]> {
        match &self.children {
            ChildState::Loaded { epoch, children } if *epoch == self.epoch => Some(children),
            _ => None,
        }
    }
}
