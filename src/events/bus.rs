//! # Event bus for broadcasting supervision events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so that the processor can
//! broadcast [`Event`]s to any number of subscribers.
//!
//! - **Broadcast semantics**: all active subscribers receive a clone of
//!   each event.
//! - **Non-persistent**: events published with no subscribers are
//!   dropped; the tree operates fine unobserved.
//! - **Bounded capacity**: slow subscribers lag and skip old events
//!   rather than backpressuring the processor.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for supervision events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to a
    /// minimum of 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active subscribers. Dropped silently if
    /// nobody is listening.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new subscriber receiving all events published after
    /// this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
