//! Ordered fan-out of change notifications.
//!
//! Every subscriber gets its own unbounded channel, so events are delivered
//! in emission order and never coalesced or dropped for a slow reader.

use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// A typed signal that any number of subscribers can listen to.
#[derive(Debug)]
pub struct Signal<T> {
    subscribers: Mutex<Vec<UnboundedSender<T>>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Only events emitted after this call are
    /// delivered to it.
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Delivers `value` to every live subscriber. Subscribers whose receiver
    /// was dropped are pruned.
    pub fn emit(&self, value: T) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
