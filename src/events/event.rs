//! # Runtime events emitted by the supervision tree.
//!
//! [`EventKind`] classifies the lifecycle of supervision nodes; the
//! [`Event`] struct carries the node's dn and optional metadata (group,
//! error text, backoff delay).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that
//! increases monotonically, so consumers can order events correctly even
//! when delivered through lossy broadcast channels.
//!
//! ## Typical flows
//! ```text
//! spawn:    RunnableStarting → RunnableHealthy [→ RunnableDone]
//! failure:  RunnableDead → RunnableCanceled (siblings)
//!           → GroupRestartScheduled{delay} → RunnableStarting ...
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervision events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A runnable incarnation was spawned and is now LIVE.
    RunnableStarting,
    /// A runnable signalled that it reached steady operation.
    RunnableHealthy,
    /// A runnable signalled completion of its one-shot work.
    RunnableDone,
    /// A runnable died with an error or panic.
    RunnableDead,
    /// A runnable exited due to cancellation; it will not be restarted
    /// on its own account.
    RunnableCanceled,
    /// A failure unit finished quiescing and will be restarted after the
    /// attached delay.
    GroupRestartScheduled,
    /// A sub-logger name was reserved under a runnable.
    LoggerReserved,
}

/// Supervision event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp; use for display only.
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// dn of the supervision node this event concerns.
    pub dn: Option<String>,
    /// Failure-unit label (`<parent dn>/<group>`), if relevant.
    pub group: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Backoff delay before restart, if relevant.
    pub delay: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence
    /// number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            dn: None,
            group: None,
            error: None,
            delay: None,
        }
    }

    /// Attaches a node dn.
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    /// Attaches a failure-unit label.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let a = Event::now(EventKind::RunnableStarting);
        let b = Event::now(EventKind::RunnableHealthy);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::RunnableDead)
            .with_dn("root.foo")
            .with_group("root/foo")
            .with_error("boom")
            .with_delay(Duration::from_millis(100));
        assert_eq!(ev.dn.as_deref(), Some("root.foo"));
        assert_eq!(ev.group.as_deref(), Some("root/foo"));
        assert_eq!(ev.error.as_deref(), Some("boom"));
        assert_eq!(ev.delay, Some(Duration::from_millis(100)));
    }
}
