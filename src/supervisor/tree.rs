//! # Supervisor: public facade of a supervision tree.
//!
//! [`Supervisor::start`] spawns the processor task and the root
//! runnable; the returned handle is the embedding application's window
//! into the tree: event subscription, settling barriers, live-runnable
//! listing and shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::events::{Bus, Event};
use crate::subscribers::{spawn_listener, Subscriber};

use super::backoff::BackoffPolicy;
use super::processor::{Processor, ProcessorRequest};
use super::runnable::{Runnable, RunnableRef};

/// Tunables of a supervision tree.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Backoff applied to failure-unit restarts.
    pub backoff: BackoffPolicy,
    /// When true, a panic in any runnable is not isolated: the whole
    /// tree is torn down and the panic surfaces through
    /// [`Supervisor::panicked`]. Used by tests that want panics to fail
    /// loudly.
    pub propagate_panic: bool,
    /// Period of the processor's GC sweep.
    pub gc_interval: Duration,
    /// Quiet GC cycles required before `wait_settled` resolves.
    pub settle_quiet_cycles: u32,
    /// Capacity of the event bus.
    pub bus_capacity: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            propagate_panic: false,
            gc_interval: Duration::from_millis(100),
            settle_quiet_cycles: 2,
            bus_capacity: 1024,
        }
    }
}

/// Handle to a running supervision tree.
///
/// Must be created inside a tokio runtime. Dropping the handle does not
/// stop the tree; call [`Supervisor::shutdown`] (or cancel via
/// [`Supervisor::cancel`]) to tear it down.
pub struct Supervisor {
    tx: mpsc::UnboundedSender<ProcessorRequest>,
    bus: Bus,
    root_token: CancellationToken,
    panic_slot: Arc<Mutex<Option<String>>>,
    panic_notify: Arc<Notify>,
}

impl Supervisor {
    /// Starts a new supervision tree with `root` as the root runnable.
    pub fn start(options: SupervisorOptions, root: impl Runnable) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Bus::new(options.bus_capacity);
        let root_token = CancellationToken::new();
        let panic_slot = Arc::new(Mutex::new(None));
        let panic_notify = Arc::new(Notify::new());

        let mut processor = Processor::new(
            rx,
            tx.clone(),
            options,
            bus.clone(),
            root_token.clone(),
            panic_slot.clone(),
            panic_notify.clone(),
        );
        let root: RunnableRef = Arc::new(root);
        processor.bootstrap(root);
        tokio::spawn(processor.run());

        Self {
            tx,
            bus,
            root_token,
            panic_slot,
            panic_notify,
        }
    }

    /// Subscribes to the tree's event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Attaches a subscriber for the lifetime of the tree.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>) {
        spawn_listener(&self.bus, subscriber, self.root_token.child_token());
    }

    /// Waits until the tree settles: no actions performed for a number
    /// of GC cycles and no restarts pending. Tests use this to
    /// synchronize without sleeping.
    pub async fn wait_settled(&self) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProcessorRequest::WaitSettled { reply })
            .map_err(|_| SupervisorError::TreeShutDown)?;
        rx.await.map_err(|_| SupervisorError::TreeShutDown)
    }

    /// Sorted dns of all runnables that are currently live (running or
    /// awaiting restart inside their failure unit).
    pub async fn live_runnables(&self) -> Result<Vec<String>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProcessorRequest::LiveRunnables { reply })
            .map_err(|_| SupervisorError::TreeShutDown)?;
        rx.await.map_err(|_| SupervisorError::TreeShutDown)
    }

    /// Cancels the whole tree. Runnables observe their contexts being
    /// canceled and wind down cooperatively.
    pub fn cancel(&self) {
        self.root_token.cancel();
    }

    /// Cancels the tree and waits up to `grace` for every runnable to
    /// exit. Returns the stuck dns if the grace period is exceeded.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), SupervisorError> {
        self.cancel();
        let deadline = Instant::now() + grace;
        loop {
            let live = self.live_runnables().await.unwrap_or_default();
            if live.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::GraceExceeded { grace, stuck: live });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// The propagated panic message, if the tree was torn down by a
    /// panic under `propagate_panic`.
    pub fn panicked(&self) -> Option<String> {
        self.panic_slot.lock().ok().and_then(|s| s.clone())
    }

    /// Waits for a propagated panic and returns its message. Only
    /// resolves under `propagate_panic`.
    pub async fn wait_panicked(&self) -> String {
        loop {
            if let Some(msg) = self.panicked() {
                return msg;
            }
            self.panic_notify.notified().await;
        }
    }
}
