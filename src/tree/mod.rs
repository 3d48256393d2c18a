//! Lazy tree of cluster resources, reconciled against watch events.
//!
//! ```text
//!   Root (cluster context)
//!    └─ Namespace "default"
//!        └─ KindFolder "Pod"         <- scoped list on first expand
//!            └─ Resource "web-1"     <- watch events keep this level fresh
//! ```
//!
//! Expansion lists a node's scope once; from then on the scope's watch feed
//! updates the cache in place. Nodes are addressed by arena id but keyed by
//! object identity, so a consuming view's selection survives updates.

mod node;
mod reconciler;

pub use node::NodeId;
pub use node::NodeKind;
pub use node::TreeNode;
pub use reconciler::ResourceTree;
