//! # Tracing log writer for supervision events.
//!
//! [`LogWriter`] emits every supervision event as a structured `tracing`
//! record carrying the node's dn. Output shape:
//!
//! ```text
//! INFO  starting dn=root.curator
//! INFO  healthy dn=root.curator
//! WARN  dead dn=root.curator.listener error="accept failed: ..."
//! INFO  group restart scheduled group=root.curator/listener delay=200ms
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::subscriber::Subscriber;

/// Built-in subscriber bridging supervision events into `tracing`.
///
/// Enabled via the `logging` feature. Intended as a sane default;
/// implement a custom [`Subscriber`] for metrics or alerting pipelines.
pub struct LogWriter;

#[async_trait]
impl Subscriber for LogWriter {
    async fn handle(&self, e: &Event) {
        let dn = e.dn.as_deref().unwrap_or("?");
        match e.kind {
            EventKind::RunnableStarting => {
                tracing::info!(dn, "starting");
            }
            EventKind::RunnableHealthy => {
                tracing::info!(dn, "healthy");
            }
            EventKind::RunnableDone => {
                tracing::info!(dn, "done");
            }
            EventKind::RunnableDead => {
                tracing::warn!(dn, error = e.error.as_deref().unwrap_or(""), "dead");
            }
            EventKind::RunnableCanceled => {
                tracing::debug!(dn, "canceled");
            }
            EventKind::GroupRestartScheduled => {
                tracing::info!(
                    group = e.group.as_deref().unwrap_or("?"),
                    delay = ?e.delay.unwrap_or_default(),
                    error = e.error.as_deref().unwrap_or(""),
                    "group restart scheduled"
                );
            }
            EventKind::LoggerReserved => {
                tracing::debug!(dn, "sub-logger reserved");
            }
        }
    }

    async fn lagged(&self, skipped: u64) {
        tracing::warn!(skipped, "log writer lagged behind event bus");
    }
}
