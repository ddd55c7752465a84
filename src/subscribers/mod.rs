//! Event subscribers.
//!
//! A [`Subscriber`] consumes supervision [`Event`]s from the [`Bus`].
//! Implementations are supplied by the embedding application (metrics,
//! alerting); `LogWriter` (behind the `logging` feature) is the
//! built-in bridge into `tracing`.

#[cfg(feature = "logging")]
mod log;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscriber;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event};

/// Spawns a listener task that feeds every bus event to the subscriber
/// until the token is canceled or the bus closes.
pub fn spawn_listener(bus: &Bus, subscriber: Arc<dyn Subscriber>, token: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => subscriber.handle(&ev).await,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        subscriber.lagged(skipped).await;
                    }
                },
            }
        }
    });
}

/// Convenience: subscriber backed by a plain function. Useful in tests.
pub struct FnSubscriber<F>(pub F);

#[async_trait::async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    async fn handle(&self, event: &Event) {
        (self.0)(event)
    }
}
