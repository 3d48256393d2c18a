//! Host editor buffer abstraction.
//!
//! The engine never owns editor text. The host (IDE, TUI, plugin runtime)
//! implements [`Buffer`] over its own document type and reports edits by
//! calling [`crate::BindingHandle::buffer_changed`]. Replacements performed
//! through [`Buffer::replace`] are engine-initiated and must not be reported
//! back as user edits.

#[cfg(test)]
use mockall::automock;

/// Stable identifier the host assigns to an open buffer.
pub type BufferId = u64;

#[cfg_attr(test, automock)]
pub trait Buffer: Send + Sync {
    /// Host-assigned identifier, stable for the lifetime of the buffer.
    fn id(&self) -> BufferId;

    /// Current full text of the buffer.
    fn read(&self) -> String;

    /// Replace the entire buffer content.
    ///
    /// Called on pull and on automatic refresh. The host should apply this
    /// as a single edit and must not route it back through
    /// `buffer_changed`.
    fn replace(&self, text: &str);
}
