//! User-facing notification fanout.
//!
//! Background workers never block on the host UI. They publish
//! [`Notification`] values into the hub and the host drains them from a
//! channel at its own pace, rendering popups, signs or status lines as it
//! sees fit.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer::BufferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Machine-readable tag for notifications the host may want to render with
/// actions instead of plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyHint {
    /// Remote changed under local edits; offer reload or force push.
    ConflictReloadOrPush,
    /// Bound object disappeared; offer recreate or close.
    ObjectDeleted,
    /// A watch stopped permanently; data may go stale.
    WatchLost,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// Underlying error rendered for display, when one exists.
    pub cause: Option<String>,
    /// Buffer the notification concerns, for host-side routing.
    pub buffer: Option<BufferId>,
    pub hint: Option<NotifyHint>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Notification {
            severity: Severity::Info,
            message: message.into(),
            cause: None,
            buffer: None,
            hint: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Notification {
            severity: Severity::Warning,
            message: message.into(),
            cause: None,
            buffer: None,
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notification {
            severity: Severity::Error,
            message: message.into(),
            cause: None,
            buffer: None,
            hint: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl ToString,
    ) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn for_buffer(
        mut self,
        buffer: BufferId,
    ) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_hint(
        mut self,
        hint: NotifyHint,
    ) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// Fanout point between engine workers and host notification surfaces.
///
/// Publishing never blocks: subscribers get unbounded channels and dead
/// subscribers are dropped on the next publish.
#[derive(Default)]
pub struct NotificationHub {
    listeners: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        NotificationHub::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    pub fn publish(
        &self,
        notification: Notification,
    ) {
        debug!(
            severity = ?notification.severity,
            message = %notification.message,
            "publishing notification"
        );
        self.listeners
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}
