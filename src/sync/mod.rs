//! Editor-to-cluster synchronization for one bound buffer.
//!
//! A binding is an actor: one task owns the buffer's sync state and
//! processes commands, buffer-change notices and watch events strictly one
//! at a time, so a pull can never interleave with a push or with a remote
//! change being applied. Callers talk to it through [`BindingHandle`].
//!
//! Remote changes reaching a clean buffer are adopted silently; reaching a
//! dirty buffer they park the binding in [`SyncPhase::Conflict`] until the
//! user pulls (adopt remote) or force-pushes (overwrite remote). The
//! [`classify`] table is the single decision point for that split.

mod binding;
mod divergence;
mod phase;

pub use binding::BindingHandle;
pub use binding::PushOptions;
pub(crate) use binding::BindingControl;
pub(crate) use binding::EditorBinding;
pub use divergence::classify;
pub use divergence::SyncAction;
pub use phase::ErrorReason;
pub use phase::SyncPhase;
