//! # Node filter seam.
//!
//! `Management.GetNodes` filters nodes through an expression evaluator
//! that this crate treats as an external collaborator: the
//! [`FilterEngine`] trait compiles an expression string once per call,
//! and the resulting [`CompiledFilter`] is applied to a [`NodeView`]
//! per node. The built-in [`MatchAll`] engine accepts only the empty
//! expression (select everything); deployments plug in a real
//! expression engine, and tests substitute closure-backed fakes.

use std::time::Duration;

use thiserror::Error;

use crate::proto;

/// The node attributes a filter expression ranges over.
#[derive(Clone, Debug)]
pub struct NodeView {
    pub id: String,
    pub state: proto::NodeState,
    pub roles: proto::NodeRoles,
    pub health: proto::NodeHealth,
    /// Age of the node's last heartbeat in the current leader tenure.
    pub time_since_heartbeat: Option<Duration>,
}

/// A malformed filter expression. Maps to `INVALID_ARGUMENT`.
#[derive(Error, Debug)]
#[error("invalid filter expression: {0}")]
pub struct FilterError(pub String);

/// Compiles filter expressions.
pub trait FilterEngine: Send + Sync + 'static {
    fn compile(&self, expression: &str) -> Result<Box<dyn CompiledFilter>, FilterError>;
}

/// A compiled filter applied per node.
pub trait CompiledFilter: Send + Sync {
    fn matches(&self, node: &NodeView) -> bool;
}

/// Engine accepting only the empty expression, which selects all nodes.
pub struct MatchAll;

impl FilterEngine for MatchAll {
    fn compile(&self, expression: &str) -> Result<Box<dyn CompiledFilter>, FilterError> {
        if expression.trim().is_empty() {
            Ok(Box::new(Accept))
        } else {
            Err(FilterError(format!(
                "no expression engine configured, cannot evaluate {expression:?}"
            )))
        }
    }
}

struct Accept;

impl CompiledFilter for Accept {
    fn matches(&self, _node: &NodeView) -> bool {
        true
    }
}

/// Engine backed by a closure over the expression string; the main
/// vehicle for substituting filter behavior in tests.
pub struct FnFilterEngine<F>(pub F);

impl<F> FilterEngine for FnFilterEngine<F>
where
    F: Fn(&str) -> Result<Box<dyn CompiledFilter>, FilterError> + Send + Sync + 'static,
{
    fn compile(&self, expression: &str) -> Result<Box<dyn CompiledFilter>, FilterError> {
        (self.0)(expression)
    }
}

/// A compiled filter backed by a predicate closure.
pub struct FnFilter<F>(pub F);

impl<F> CompiledFilter for FnFilter<F>
where
    F: Fn(&NodeView) -> bool + Send + Sync,
{
    fn matches(&self, node: &NodeView) -> bool {
        (self.0)(node)
    }
}
