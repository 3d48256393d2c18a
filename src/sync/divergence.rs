//! Divergence classification for a bound buffer.
//!
//! The decision is deliberately a pure function of two booleans so every
//! branch of the sync state machine funnels through one auditable table.

/// What a binding should do about an incoming remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing to reconcile (no real change, or only local edits pending).
    NoOp,
    /// Remote advanced and the buffer is clean: adopt the remote state.
    AutoRefresh,
    /// Both sides changed: hold everything and ask.
    Conflict,
}

/// Classify local-vs-remote divergence.
///
/// `local_dirty` is whether the buffer differs from the last synced text;
/// `remote_advanced` is whether the incoming version token differs from the
/// last synced one. A self-echo of our own push arrives with the version we
/// already adopted, lands in a `NoOp` row, and is thereby ignored.
pub fn classify(
    local_dirty: bool,
    remote_advanced: bool,
) -> SyncAction {
    match (local_dirty, remote_advanced) {
        (_, false) => SyncAction::NoOp,
        (false, true) => SyncAction::AutoRefresh,
        (true, true) => SyncAction::Conflict,
    }
}
