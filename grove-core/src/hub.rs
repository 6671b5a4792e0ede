//! Fan-out of updates to any number of subscriber channels
//!
//! Sends are synchronous and happen in registration order. Subscribers
//! must use buffered channels or drain them on their own thread, otherwise
//! a slow subscriber stalls the publisher.

use crate::update::Update;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
pub struct UpdateHub {
    subscribers: Mutex<Vec<Sender<Update>>>,
}

impl UpdateHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sender: Sender<Update>) {
        self.subscribers.lock().push(sender);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Send `update` to every subscriber. Empty updates are dropped and
    /// subscribers whose receiver is gone are unregistered. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, update: &Update) -> usize {
        if update.is_empty() {
            return 0;
        }

        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sender| sender.send(update.clone()).is_ok());

        let dropped = before - subscribers.len();
        if dropped > 0 {
            debug!(dropped, "removed disconnected subscribers");
        }
        subscribers.len()
    }
}
