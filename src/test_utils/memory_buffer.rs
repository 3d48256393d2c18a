use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::buffer::BufferId;

/// Plain-string editor buffer for tests.
pub struct MemoryBuffer {
    id: BufferId,
    text: Mutex<String>,
}

impl MemoryBuffer {
    pub fn new(
        id: BufferId,
        initial: &str,
    ) -> Arc<Self> {
        Arc::new(MemoryBuffer {
            id,
            text: Mutex::new(initial.to_string()),
        })
    }

    /// Simulate a user edit. The test must follow up with
    /// `buffer_changed()` on the binding, exactly as a host would.
    pub fn set_text(
        &self,
        text: &str,
    ) {
        *self.text.lock() = text.to_string();
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl Buffer for MemoryBuffer {
    fn id(&self) -> BufferId {
        self.id
    }

    fn read(&self) -> String {
        self.text.lock().clone()
    }

    fn replace(
        &self,
        text: &str,
    ) {
        *self.text.lock() = text.to_string();
    }
}
