//! # dn-scoped leveled logging.
//!
//! Every runnable logs through a [`SubLogger`] bound to a dn; records
//! come out of `tracing` carrying that dn, so log output can be filtered
//! and grouped by position in the supervision tree.
//!
//! A runnable's own logger is obtained with
//! [`RunContext::logger`](super::RunContext::logger); additional named
//! loggers under the runnable are reserved with
//! [`RunContext::sub_logger`](super::RunContext::sub_logger) and share
//! the child-name namespace with runnables.

/// Leveled logger bound to a supervision-tree dn.
#[derive(Clone, Debug)]
pub struct SubLogger {
    dn: String,
}

impl SubLogger {
    pub(crate) fn new(dn: String) -> Self {
        Self { dn }
    }

    /// The dn this logger emits under.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Logs at INFO level.
    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!(dn = %self.dn, "{}", msg.as_ref());
    }

    /// Logs at WARN level.
    pub fn warn(&self, msg: impl AsRef<str>) {
        tracing::warn!(dn = %self.dn, "{}", msg.as_ref());
    }

    /// Logs at ERROR level.
    pub fn error(&self, msg: impl AsRef<str>) {
        tracing::error!(dn = %self.dn, "{}", msg.as_ref());
    }

    /// Logs at DEBUG level.
    pub fn debug(&self, msg: impl AsRef<str>) {
        tracing::debug!(dn = %self.dn, "{}", msg.as_ref());
    }
}
