//! Cluster access layer.
//!
//! [`ClusterApi`] is the only seam through which the engine talks to a
//! cluster: point reads, scoped lists, compare-and-swap writes and watch
//! streams. Everything above it (bindings, watch hub, tree) is transport
//! agnostic; everything below it belongs to the host's client of choice.

mod api;
mod types;

pub use api::*;
pub use types::*;
