//! # Processor: single-owner state machine of a supervision tree.
//!
//! One processor task per tree owns every [`SupervisionNode`] and
//! [`GroupRecord`]. Runnables, timers and the public facade never touch
//! that state directly: they post [`ProcessorRequest`] messages, and the
//! processor applies them one at a time. This linearizes all state
//! transitions without a single lock on the node graph.
//!
//! ## Request flow
//! ```text
//! RunContext::run/run_group ──► Spawn ───────┐
//! RunContext::signal ─────────► Signal ──────┤
//! RunContext::sub_logger ─────► Reserve ─────┼──► processor loop
//! invocation watcher ─────────► Report ──────┤      (owns nodes/groups)
//! backoff timer ──────────────► RestartGroup ┤
//! facade/tests ───────────────► WaitSettled ─┘
//! ```
//!
//! ## Failure handling
//! A DEAD member marks its whole group as restarting: every still-live
//! sibling is canceled, the processor waits for the unit's subtrees to
//! quiesce, then re-spawns all members after the group's backoff delay.
//! Reaching HEALTHY (all members) zeroes the failure counter.
//!
//! ## Settling
//! GC ticks with no processed actions, no pending restart timers and no
//! quiescing groups increment a quiet streak; `WaitSettled` waiters are
//! released once the streak reaches the configured length. Tests use
//! this to synchronize without sleeping.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};

use super::backoff::BackoffPolicy;
use super::handle::{RunContext, Signal};
use super::node::{
    child_dn, valid_name, GroupKey, GroupRecord, NodeState, SupervisionNode, ROOT_DN,
};
use super::runnable::RunnableRef;
use super::tree::SupervisorOptions;

/// How an invocation of a runnable ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Returned `Ok(())`.
    Clean,
    /// Returned a cancellation outcome.
    Canceled,
    /// Returned an error.
    Failed(String),
    /// Panicked; the payload is rendered to a message.
    Panicked(String),
}

/// Messages accepted by the processor.
pub(crate) enum ProcessorRequest {
    Spawn {
        parent: String,
        parent_incarnation: u64,
        group: String,
        members: Vec<(String, RunnableRef)>,
        wait_healthy: bool,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Signal {
        dn: String,
        incarnation: u64,
        signal: Signal,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Reserve {
        dn: String,
        incarnation: u64,
        name: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Report {
        dn: String,
        incarnation: u64,
        outcome: Outcome,
    },
    RestartGroup {
        key: GroupKey,
    },
    WaitSettled {
        reply: oneshot::Sender<()>,
    },
    LiveRunnables {
        reply: oneshot::Sender<Vec<String>>,
    },
}

pub(crate) struct Processor {
    rx: mpsc::UnboundedReceiver<ProcessorRequest>,
    tx: mpsc::UnboundedSender<ProcessorRequest>,
    nodes: HashMap<String, SupervisionNode>,
    groups: HashMap<GroupKey, GroupRecord>,
    backoff: BackoffPolicy,
    options: SupervisorOptions,
    bus: Bus,
    root_token: CancellationToken,
    /// Actions processed since the last GC tick.
    actions: u64,
    /// Consecutive quiet GC ticks.
    quiet_cycles: u32,
    /// Restart timers in flight.
    pending_restarts: usize,
    settle_waiters: Vec<oneshot::Sender<()>>,
    panic_slot: Arc<Mutex<Option<String>>>,
    panic_notify: Arc<Notify>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<ProcessorRequest>,
        tx: mpsc::UnboundedSender<ProcessorRequest>,
        options: SupervisorOptions,
        bus: Bus,
        root_token: CancellationToken,
        panic_slot: Arc<Mutex<Option<String>>>,
        panic_notify: Arc<Notify>,
    ) -> Self {
        Self {
            rx,
            tx,
            nodes: HashMap::new(),
            groups: HashMap::new(),
            backoff: options.backoff,
            options,
            bus,
            root_token,
            actions: 0,
            quiet_cycles: 0,
            pending_restarts: 0,
            settle_waiters: Vec::new(),
            panic_slot,
            panic_notify,
        }
    }

    /// Installs and spawns the root runnable. Called once before the
    /// processor loop starts.
    pub(crate) fn bootstrap(&mut self, root: RunnableRef) {
        self.nodes.insert(
            ROOT_DN.to_string(),
            SupervisionNode {
                parent: None,
                group: ROOT_DN.to_string(),
                state: NodeState::New,
                incarnation: 0,
                token: CancellationToken::new(),
                runnable: root,
                children: Default::default(),
                reserved: Default::default(),
                running: false,
            },
        );
        self.groups.insert(
            (String::new(), ROOT_DN.to_string()),
            GroupRecord {
                members: vec![ROOT_DN.to_string()],
                failures: 0,
                restarting: false,
                restart_scheduled: false,
                last_error: None,
                healthy_waiters: Vec::new(),
            },
        );
        self.start_incarnation(ROOT_DN);
    }

    pub(crate) async fn run(mut self) {
        let mut gc = tokio::time::interval(self.options.gc_interval);
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                req = self.rx.recv() => match req {
                    Some(r) => self.handle(r),
                    None => break,
                },
                _ = gc.tick() => {
                    if self.gc() {
                        break;
                    }
                }
            }
        }
    }

    fn handle(&mut self, req: ProcessorRequest) {
        match req {
            ProcessorRequest::Spawn {
                parent,
                parent_incarnation,
                group,
                members,
                wait_healthy,
                reply,
            } => self.handle_spawn(parent, parent_incarnation, group, members, wait_healthy, reply),
            ProcessorRequest::Signal {
                dn,
                incarnation,
                signal,
                reply,
            } => self.handle_signal(dn, incarnation, signal, reply),
            ProcessorRequest::Reserve {
                dn,
                incarnation,
                name,
                reply,
            } => self.handle_reserve(dn, incarnation, name, reply),
            ProcessorRequest::Report {
                dn,
                incarnation,
                outcome,
            } => self.handle_report(dn, incarnation, outcome),
            ProcessorRequest::RestartGroup { key } => self.handle_restart_group(key),
            ProcessorRequest::WaitSettled { reply } => self.settle_waiters.push(reply),
            ProcessorRequest::LiveRunnables { reply } => {
                let _ = reply.send(self.live_runnables());
            }
        }
    }

    // ---- spawning ----------------------------------------------------

    fn handle_spawn(
        &mut self,
        parent: String,
        parent_incarnation: u64,
        group: String,
        members: Vec<(String, RunnableRef)>,
        wait_healthy: bool,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    ) {
        self.actions += 1;

        let parent_ok = matches!(
            self.nodes.get(&parent),
            Some(p) if p.incarnation == parent_incarnation && !p.state.is_terminal()
        );
        if !parent_ok {
            let _ = reply.send(Err(SupervisorError::StaleContext { dn: parent }));
            return;
        }
        if let Err(e) = self.validate_member_names(&parent, &members) {
            let _ = reply.send(Err(e));
            return;
        }

        let key: GroupKey = (parent.clone(), group.clone());
        self.groups.insert(
            key.clone(),
            GroupRecord {
                members: members.iter().map(|(n, _)| n.clone()).collect(),
                failures: 0,
                restarting: false,
                restart_scheduled: false,
                last_error: None,
                healthy_waiters: Vec::new(),
            },
        );

        for (name, runnable) in members {
            let dn = child_dn(&parent, &name);
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.insert(name.clone());
            }
            self.nodes.insert(
                dn.clone(),
                SupervisionNode {
                    parent: Some(parent.clone()),
                    group: group.clone(),
                    state: NodeState::New,
                    incarnation: 0,
                    token: CancellationToken::new(),
                    runnable,
                    children: Default::default(),
                    reserved: Default::default(),
                    running: false,
                },
            );
            self.start_incarnation(&dn);
        }

        if wait_healthy {
            if let Some(g) = self.groups.get_mut(&key) {
                g.healthy_waiters.push(reply);
            }
        } else {
            let _ = reply.send(Ok(()));
        }
    }

    fn validate_member_names(
        &self,
        parent: &str,
        members: &[(String, RunnableRef)],
    ) -> Result<(), SupervisorError> {
        let Some(p) = self.nodes.get(parent) else {
            return Err(SupervisorError::StaleContext {
                dn: parent.to_string(),
            });
        };
        let mut seen = std::collections::BTreeSet::new();
        for (name, _) in members {
            if !valid_name(name) {
                return Err(SupervisorError::InvalidName { name: name.clone() });
            }
            if p.children.contains(name) || p.reserved.contains(name) || !seen.insert(name.clone())
            {
                return Err(SupervisorError::NameTaken {
                    parent: parent.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Spawns a fresh incarnation of the node at `dn`: bumps the
    /// incarnation counter, derives a new token from the parent's
    /// current one, runs the runnable on its own task and watches its
    /// outcome.
    fn start_incarnation(&mut self, dn: &str) {
        self.actions += 1;
        let parent_token = match self.nodes.get(dn).and_then(|n| n.parent.clone()) {
            Some(p) => match self.nodes.get(&p) {
                Some(pn) => pn.token.clone(),
                None => return,
            },
            None => self.root_token.clone(),
        };
        let Some(node) = self.nodes.get_mut(dn) else {
            return;
        };
        node.incarnation += 1;
        node.state = NodeState::Live;
        node.running = true;
        node.token = parent_token.child_token();
        let incarnation = node.incarnation;

        let ctx = RunContext::new(
            dn.to_string(),
            incarnation,
            node.token.clone(),
            self.tx.clone(),
        );
        let fut = node.runnable.run(ctx);

        self.bus
            .publish(Event::now(EventKind::RunnableStarting).with_dn(dn));

        let join = tokio::spawn(fut);
        let tx = self.tx.clone();
        let dn = dn.to_string();
        tokio::spawn(async move {
            let outcome = match join.await {
                Ok(Ok(())) => Outcome::Clean,
                Ok(Err(e)) if e.is_cancellation() => Outcome::Canceled,
                Ok(Err(e)) => Outcome::Failed(e.to_string()),
                Err(join_err) if join_err.is_panic() => {
                    Outcome::Panicked(panic_message(join_err.into_panic()))
                }
                // The task was aborted; only happens on runtime teardown.
                Err(_) => Outcome::Canceled,
            };
            let _ = tx.send(ProcessorRequest::Report {
                dn,
                incarnation,
                outcome,
            });
        });
    }

    // ---- signals and reservations ------------------------------------

    fn handle_signal(
        &mut self,
        dn: String,
        incarnation: u64,
        signal: Signal,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    ) {
        self.actions += 1;
        let res = self.apply_signal(&dn, incarnation, signal);
        let _ = reply.send(res);
    }

    fn apply_signal(
        &mut self,
        dn: &str,
        incarnation: u64,
        signal: Signal,
    ) -> Result<(), SupervisorError> {
        let Some(node) = self.nodes.get_mut(dn) else {
            return Err(SupervisorError::StaleContext { dn: dn.to_string() });
        };
        if node.incarnation != incarnation {
            return Err(SupervisorError::StaleContext { dn: dn.to_string() });
        }
        match signal {
            Signal::Healthy => match node.state {
                NodeState::Live => {
                    node.state = NodeState::Healthy;
                    let key = (node.parent.clone().unwrap_or_default(), node.group.clone());
                    self.bus
                        .publish(Event::now(EventKind::RunnableHealthy).with_dn(dn));
                    self.on_member_healthy(&key);
                    Ok(())
                }
                NodeState::Healthy => Ok(()),
                _ => Err(SupervisorError::StaleContext { dn: dn.to_string() }),
            },
            Signal::Done => match node.state {
                NodeState::Healthy => {
                    node.state = NodeState::Done;
                    self.bus
                        .publish(Event::now(EventKind::RunnableDone).with_dn(dn));
                    Ok(())
                }
                NodeState::Live => Err(SupervisorError::DoneBeforeHealthy { dn: dn.to_string() }),
                NodeState::Done => Ok(()),
                _ => Err(SupervisorError::StaleContext { dn: dn.to_string() }),
            },
        }
    }

    /// Zeroes the failure counter and releases `run_group` waiters once
    /// every member of the unit reached HEALTHY (or completed).
    fn on_member_healthy(&mut self, key: &GroupKey) {
        let all_healthy = match self.groups.get(key) {
            Some(g) => g.members.iter().all(|m| {
                matches!(
                    self.nodes.get(&member_dn(&key.0, m)).map(|n| n.state),
                    Some(NodeState::Healthy) | Some(NodeState::Done)
                )
            }),
            None => false,
        };
        if !all_healthy {
            return;
        }
        if let Some(g) = self.groups.get_mut(key) {
            g.failures = 0;
            for w in g.healthy_waiters.drain(..) {
                let _ = w.send(Ok(()));
            }
        }
    }

    fn handle_reserve(
        &mut self,
        dn: String,
        incarnation: u64,
        name: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    ) {
        self.actions += 1;
        let res = (|| {
            if !valid_name(&name) {
                return Err(SupervisorError::InvalidName { name: name.clone() });
            }
            let Some(node) = self.nodes.get_mut(&dn) else {
                return Err(SupervisorError::StaleContext { dn: dn.clone() });
            };
            if node.incarnation != incarnation {
                return Err(SupervisorError::StaleContext { dn: dn.clone() });
            }
            if node.children.contains(&name) || node.reserved.contains(&name) {
                return Err(SupervisorError::NameTaken {
                    parent: dn.clone(),
                    name: name.clone(),
                });
            }
            node.reserved.insert(name.clone());
            Ok(())
        })();
        if res.is_ok() {
            self.bus
                .publish(Event::now(EventKind::LoggerReserved).with_dn(child_dn(&dn, &name)));
        }
        let _ = reply.send(res);
    }

    // ---- outcome handling --------------------------------------------

    fn handle_report(&mut self, dn: String, incarnation: u64, outcome: Outcome) {
        self.actions += 1;
        let (state, canceled) = match self.nodes.get(&dn) {
            Some(n) if n.incarnation == incarnation => (n.state, n.token.is_cancelled()),
            // Stale or already removed incarnation.
            _ => return,
        };
        if let Some(n) = self.nodes.get_mut(&dn) {
            n.running = false;
        }

        if self.options.propagate_panic {
            if let Outcome::Panicked(msg) = &outcome {
                self.record_panic(msg.clone());
            }
        }

        enum Final {
            Done,
            Canceled,
            Dead(String),
        }
        let fin = match outcome {
            Outcome::Clean => {
                if state == NodeState::Done {
                    Final::Done
                } else if canceled {
                    Final::Canceled
                } else {
                    Final::Dead("returned without signalling done".to_string())
                }
            }
            Outcome::Canceled => {
                if state == NodeState::Done {
                    Final::Done
                } else if canceled {
                    Final::Canceled
                } else {
                    Final::Dead("returned canceled without cancellation".to_string())
                }
            }
            Outcome::Failed(e) | Outcome::Panicked(e) => {
                if canceled {
                    Final::Canceled
                } else {
                    Final::Dead(e)
                }
            }
        };

        match fin {
            Final::Done => {
                if let Some(n) = self.nodes.get_mut(&dn) {
                    n.state = NodeState::Done;
                }
                // Children of a completed one-shot keep running.
            }
            Final::Canceled => {
                if let Some(n) = self.nodes.get_mut(&dn) {
                    n.state = NodeState::Canceled;
                }
                self.bus
                    .publish(Event::now(EventKind::RunnableCanceled).with_dn(&dn));
            }
            Final::Dead(error) => self.transition_dead(&dn, error),
        }

        self.check_restart_path(&dn);
    }

    /// DEAD transition: cancel the subtree, mark the failure unit as
    /// restarting and cancel every still-live sibling in it.
    fn transition_dead(&mut self, dn: &str, error: String) {
        let (parent, group) = match self.nodes.get_mut(dn) {
            Some(n) => {
                n.state = NodeState::Dead;
                n.token.cancel();
                (n.parent.clone().unwrap_or_default(), n.group.clone())
            }
            None => return,
        };
        self.bus.publish(
            Event::now(EventKind::RunnableDead)
                .with_dn(dn)
                .with_error(error.clone()),
        );

        let key: GroupKey = (parent.clone(), group);
        let members = match self.groups.get_mut(&key) {
            Some(g) => {
                if g.restarting {
                    // Already quiescing; this death is part of it.
                    return;
                }
                g.restarting = true;
                g.failures += 1;
                g.last_error = Some(error);
                g.members.clone()
            }
            None => return,
        };
        for m in &members {
            let mdn = member_dn(&parent, m);
            if mdn == dn {
                continue;
            }
            if let Some(n) = self.nodes.get(&mdn) {
                if matches!(n.state, NodeState::Live | NodeState::Healthy) {
                    n.token.cancel();
                }
            }
        }
    }

    /// Re-evaluates restart readiness for the node's own failure unit
    /// and for every ancestor unit (a canceled descendant may be the
    /// last thing an ancestor group was waiting on).
    fn check_restart_path(&mut self, dn: &str) {
        let mut cursor = Some(dn.to_string());
        while let Some(d) = cursor {
            let (parent, group) = match self.nodes.get(&d) {
                Some(n) => (n.parent.clone().unwrap_or_default(), n.group.clone()),
                None => break,
            };
            self.try_schedule_restart(&(parent.clone(), group));
            cursor = if parent.is_empty() { None } else { Some(parent) };
        }
    }

    /// Arms the backoff timer for a quiesced failure unit.
    fn try_schedule_restart(&mut self, key: &GroupKey) {
        let ready = match self.groups.get(key) {
            Some(g) if g.restarting && !g.restart_scheduled => g
                .members
                .iter()
                .all(|m| self.subtree_quiet(&member_dn(&key.0, m))),
            _ => false,
        };
        if !ready {
            return;
        }
        let Some(g) = self.groups.get_mut(key) else {
            return;
        };
        g.restart_scheduled = true;
        let delay = self.backoff.delay(g.failures);
        let label = format!("{}/{}", key.0, key.1);
        let mut ev = Event::now(EventKind::GroupRestartScheduled)
            .with_group(label)
            .with_delay(delay);
        if let Some(e) = &g.last_error {
            ev = ev.with_error(e.clone());
        }
        self.bus.publish(ev);

        self.pending_restarts += 1;
        let tx = self.tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ProcessorRequest::RestartGroup { key });
        });
    }

    /// True once no invocation task is live anywhere in the subtree.
    fn subtree_quiet(&self, dn: &str) -> bool {
        match self.nodes.get(dn) {
            None => true,
            Some(n) => {
                if n.running {
                    return false;
                }
                n.children.iter().all(|c| self.subtree_quiet(&child_dn(dn, c)))
            }
        }
    }

    fn handle_restart_group(&mut self, key: GroupKey) {
        self.actions += 1;
        self.pending_restarts = self.pending_restarts.saturating_sub(1);
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        g.restart_scheduled = false;
        if !g.restarting {
            return;
        }
        let parent_alive = if self.root_token.is_cancelled() {
            false
        } else if key.0.is_empty() {
            true
        } else {
            matches!(
                self.nodes.get(&key.0),
                Some(p) if !p.token.is_cancelled()
                    && !matches!(p.state, NodeState::Dead | NodeState::Canceled)
            )
        };
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        g.restarting = false;
        if !parent_alive {
            return;
        }
        let members = g.members.clone();
        for m in members {
            let mdn = member_dn(&key.0, &m);
            self.remove_descendants(&mdn);
            if let Some(n) = self.nodes.get_mut(&mdn) {
                n.children.clear();
                n.reserved.clear();
                n.state = NodeState::New;
            }
            self.start_incarnation(&mdn);
        }
    }

    /// Removes the records of everything below `dn` (the node itself
    /// stays; it is about to be re-incarnated).
    fn remove_descendants(&mut self, dn: &str) {
        let children: Vec<String> = self
            .nodes
            .get(dn)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default();
        for c in children {
            let cdn = child_dn(dn, &c);
            self.remove_descendants(&cdn);
            self.nodes.remove(&cdn);
        }
        self.groups.retain(|k, _| k.0 != dn);
    }

    // ---- GC / settling -----------------------------------------------

    /// One GC sweep. Returns true once the tree is torn down and fully
    /// drained, letting the processor task exit.
    fn gc(&mut self) -> bool {
        let busy = self.actions > 0
            || self.pending_restarts > 0
            || self.groups.values().any(|g| g.restarting);
        self.actions = 0;
        if busy {
            self.quiet_cycles = 0;
        } else {
            self.quiet_cycles = self.quiet_cycles.saturating_add(1);
            if self.quiet_cycles >= self.options.settle_quiet_cycles
                && !self.settle_waiters.is_empty()
            {
                for w in self.settle_waiters.drain(..) {
                    let _ = w.send(());
                }
            }
        }
        self.root_token.is_cancelled()
            && self.pending_restarts == 0
            && self
                .nodes
                .values()
                .all(|n| !n.running && n.state.is_terminal())
    }

    fn live_runnables(&self) -> Vec<String> {
        let mut live: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.running || !n.state.is_terminal())
            .map(|(dn, _)| dn.clone())
            .collect();
        live.sort_unstable();
        live
    }

    fn record_panic(&mut self, msg: String) {
        if let Ok(mut slot) = self.panic_slot.lock() {
            slot.get_or_insert(msg);
        }
        self.panic_notify.notify_waiters();
        self.root_token.cancel();
    }
}

/// Member dn within a failure unit; the root group's parent is the
/// empty string and its member dn is the bare root dn.
fn member_dn(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        child_dn(parent, name)
    }
}

/// Renders a panic payload into a displayable message.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: non-string payload".to_string()
    }
}
