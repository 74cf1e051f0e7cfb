use crate::models::Message;
use std::collections::VecDeque;

/// Maximum number of messages kept on the dashboard.
pub const MESSAGE_CAPACITY: usize = 100;

/// Newest-first list of received messages, never longer than its capacity.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(MESSAGE_CAPACITY)
    }
}

impl MessageBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepends `message`, dropping the oldest entries beyond capacity.
    pub fn push(&mut self, message: Message) {
        self.messages.push_front(message);
        self.messages.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in display order, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}
