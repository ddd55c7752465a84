//! # Subscriber trait for supervision events.

use async_trait::async_trait;

use crate::events::Event;

/// Consumes supervision events.
///
/// Handlers run on a shared listener task; they should be quick and must
/// not block on the supervisor's own API (deadlock risk: the processor
/// never waits for subscribers, but a subscriber waiting on a settle
/// barrier would starve itself).
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Handles a single event.
    async fn handle(&self, event: &Event);

    /// Called when the listener lagged behind and `skipped` events were
    /// dropped for this subscriber.
    async fn lagged(&self, skipped: u64) {
        let _ = skipped;
    }
}
