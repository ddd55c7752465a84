//! Supervision-tree behavior: group health, sibling restarts, panic
//! isolation, backoff growth and reset, naming collisions, and
//! resilience against misbehaving runnables.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use clustervisor::{
    runnable_fn, RunContext, RunnableError, RunnableRef, Signal, Supervisor, SupervisorError,
    SupervisorOptions,
};

const WAIT: Duration = Duration::from_secs(10);

/// A runnable that immediately reports healthy, pings `healthy`, and
/// pings `done` once it gets canceled.
fn runnable_becomes_healthy(
    healthy: mpsc::UnboundedSender<()>,
    done: mpsc::UnboundedSender<()>,
) -> RunnableRef {
    runnable_fn(move |ctx: RunContext| {
        let healthy = healthy.clone();
        let done = done.clone();
        async move {
            ctx.signal(Signal::Healthy).await?;
            let _ = healthy.send(());
            ctx.cancelled().await;
            let _ = done.send(());
            Err(RunnableError::Canceled)
        }
    })
}

/// A runnable that spawns a binary subtree of the given depth before
/// reporting healthy.
fn runnable_spawns_more(
    healthy: Option<mpsc::UnboundedSender<()>>,
    done: Option<mpsc::UnboundedSender<()>>,
    levels: u32,
) -> RunnableRef {
    runnable_fn(move |ctx: RunContext| {
        let healthy = healthy.clone();
        let done = done.clone();
        async move {
            if levels > 0 {
                ctx.run_group(vec![
                    ("a", runnable_spawns_more(None, None, levels - 1)),
                    ("b", runnable_spawns_more(None, None, levels - 1)),
                ])
                .await?;
            }
            ctx.signal(Signal::Healthy).await?;
            if let Some(h) = &healthy {
                let _ = h.send(());
            }
            ctx.cancelled().await;
            if let Some(d) = &done {
                let _ = d.send(());
            }
            Err(RunnableError::Canceled)
        }
    })
}

// ---- remote-controlled runnable ---------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RcState {
    New,
    Healthy,
    Done,
}

enum RcCommand {
    BecomeHealthy,
    BecomeDone,
    Die,
    Panic,
    State(oneshot::Sender<RcState>),
}

/// Remote-controlled runnable: the test drives its state transitions
/// over a command channel that survives restarts.
#[derive(Clone)]
struct Rc {
    tx: mpsc::Sender<RcCommand>,
}

impl Rc {
    fn new() -> (Self, RunnableRef) {
        let (tx, rx) = mpsc::channel(1);
        let rx = Arc::new(Mutex::new(rx));
        let runnable = runnable_fn(move |ctx: RunContext| {
            let rx = rx.clone();
            async move {
                let mut rx = rx.lock().await;
                let mut state = RcState::New;
                loop {
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(RunnableError::Canceled),
                        cmd = rx.recv() => match cmd {
                            None => return Err(RunnableError::failed("remote control dropped")),
                            Some(RcCommand::BecomeHealthy) => {
                                ctx.signal(Signal::Healthy).await?;
                                state = RcState::Healthy;
                            }
                            Some(RcCommand::BecomeDone) => {
                                ctx.signal(Signal::Done).await?;
                                state = RcState::Done;
                            }
                            Some(RcCommand::Die) => {
                                return Err(RunnableError::failed("died on request"));
                            }
                            Some(RcCommand::Panic) => panic!("at the disco"),
                            Some(RcCommand::State(reply)) => {
                                let _ = reply.send(state);
                            }
                        },
                    }
                }
            }
        });
        (Self { tx }, runnable)
    }

    async fn become_healthy(&self) {
        self.tx.send(RcCommand::BecomeHealthy).await.expect("rc send");
    }

    async fn become_done(&self) {
        self.tx.send(RcCommand::BecomeDone).await.expect("rc send");
    }

    async fn die(&self) {
        self.tx.send(RcCommand::Die).await.expect("rc send");
    }

    async fn panic_now(&self) {
        self.tx.send(RcCommand::Panic).await.expect("rc send");
    }

    async fn state(&self) -> RcState {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RcCommand::State(reply))
            .await
            .expect("rc send");
        rx.await.expect("rc state reply")
    }

    /// Polls until the runnable's current incarnation reports the
    /// wanted state.
    async fn wait_state(&self, want: RcState) {
        timeout(WAIT, async {
            loop {
                if self.state().await == want {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("rc state wait timed out");
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<()>, what: &str) {
    timeout(WAIT, rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel for {what} closed"));
}

// ---- scenarios --------------------------------------------------------

/// Scenario: a healthy two-member group; both members reach HEALTHY in
/// bounded time.
#[tokio::test]
async fn healthy_group_reaches_healthy() {
    let (h1_tx, mut h1) = mpsc::unbounded_channel();
    let (d1_tx, _d1) = mpsc::unbounded_channel();
    let (h2_tx, mut h2) = mpsc::unbounded_channel();
    let (d2_tx, _d2) = mpsc::unbounded_channel();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = runnable_becomes_healthy(h1_tx.clone(), d1_tx.clone());
        let two = runnable_becomes_healthy(h2_tx.clone(), d2_tx.clone());
        async move {
            ctx.run_group(vec![("one", one), ("two", two)]).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    recv(&mut h1, "runnable 'one' to become healthy").await;
    recv(&mut h2, "runnable 'two' to become healthy").await;
    sup.wait_settled().await.expect("settle");
    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Scenario: a group member dying kills its sibling and the whole group
/// is restarted together.
#[tokio::test]
async fn sibling_restarts_when_member_dies() {
    let (h1_tx, mut h1) = mpsc::unbounded_channel();
    let (d1_tx, mut d1) = mpsc::unbounded_channel();
    let (two, two_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = runnable_becomes_healthy(h1_tx.clone(), d1_tx.clone());
        let two = two_runnable.clone();
        async move {
            ctx.run_group(vec![("one", one), ("two", two)]).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    two.become_healthy().await;
    recv(&mut h1, "runnable 'one' to become healthy").await;
    sup.wait_settled().await.expect("settle");

    // Killing 'two' cancels 'one' and restarts both as a unit.
    two.die().await;
    recv(&mut d1, "runnable 'one' to be canceled").await;
    recv(&mut h1, "runnable 'one' to restart").await;

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Scenario: a deep subtree under a failing sibling is restarted
/// cleanly.
#[tokio::test]
async fn deep_subtree_restarts_on_sibling_failure() {
    let (h1_tx, mut h1) = mpsc::unbounded_channel();
    let (d1_tx, mut d1) = mpsc::unbounded_channel();
    let (two, two_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = runnable_spawns_more(Some(h1_tx.clone()), Some(d1_tx.clone()), 3);
        let two = two_runnable.clone();
        async move {
            ctx.run_group(vec![("one", one), ("two", two)]).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    two.become_healthy().await;
    recv(&mut h1, "subtree root to become healthy").await;

    two.die().await;
    recv(&mut d1, "subtree root to be canceled").await;
    recv(&mut h1, "subtree root to restart").await;

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Scenario: a panicking runnable is isolated; the process survives and
/// the group restarts.
#[tokio::test]
async fn panic_is_isolated_and_group_restarts() {
    let (h1_tx, mut h1) = mpsc::unbounded_channel();
    let (d1_tx, mut d1) = mpsc::unbounded_channel();
    let (two, two_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = runnable_becomes_healthy(h1_tx.clone(), d1_tx.clone());
        let two = two_runnable.clone();
        async move {
            ctx.run_group(vec![("one", one), ("two", two)]).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    two.become_healthy().await;
    recv(&mut h1, "runnable 'one' to become healthy").await;

    two.panic_now().await;
    recv(&mut d1, "runnable 'one' to be canceled").await;
    recv(&mut h1, "runnable 'one' to restart").await;

    // The panic never propagated: both members are running again.
    two.become_healthy().await;
    two.wait_state(RcState::Healthy).await;
    assert!(sup.panicked().is_none());

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Scenario: backoff grows exponentially across rapid failures and
/// resets once the runnable reports healthy.
#[tokio::test]
async fn backoff_grows_and_resets_on_healthy() {
    let (one, one_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = one_runnable.clone();
        async move {
            ctx.run("one", one).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    one.become_healthy().await;
    one.wait_state(RcState::Healthy).await;

    // Die a bunch of times in a row; this brings the next backoff to
    // over a second.
    for _ in 0..4 {
        one.die().await;
        one.wait_state(RcState::New).await;
    }
    let start = Instant::now();
    one.die().await;
    one.become_healthy().await;
    one.wait_state(RcState::Healthy).await;
    let taken = start.elapsed();
    assert!(
        taken >= Duration::from_secs(1),
        "restart after repeated failures took {taken:?}, wanted at least 1s of backoff"
    );

    sup.wait_settled().await.expect("settle");

    // Becoming healthy reset the backoff: the next restart is fast.
    let start = Instant::now();
    one.die().await;
    one.become_healthy().await;
    one.wait_state(RcState::Healthy).await;
    let taken = start.elapsed();
    assert!(
        taken < Duration::from_secs(1),
        "restart after reset took {taken:?}, wanted under 1s"
    );

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// A one-shot runnable signals healthy then done and is left alone: no
/// restart, and a later failure-free tree settles around it.
#[tokio::test]
async fn one_shot_runnable_completes_cleanly() {
    let (one, one_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let one = one_runnable.clone();
        async move {
            ctx.run("one", one).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    one.become_healthy().await;
    one.become_done().await;
    one.wait_state(RcState::Done).await;
    sup.wait_settled().await.expect("settle");

    // Signalling done twice is idempotent and does not kill the
    // runnable.
    one.become_done().await;
    one.wait_state(RcState::Done).await;

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Sub-logger reservations and child names share one namespace, in both
/// directions.
#[tokio::test]
async fn sub_logger_and_runnable_names_collide() {
    let (foo_tx, foo_rx) = oneshot::channel::<Result<(), String>>();
    let (root_tx, root_rx) = oneshot::channel::<Result<(), String>>();
    let foo_tx = Arc::new(Mutex::new(Some(foo_tx)));
    let root_tx = Arc::new(Mutex::new(Some(root_tx)));

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let foo_tx = foo_tx.clone();
        let root_tx = root_tx.clone();
        async move {
            // foo reserves a sub-logger, then tries to spawn a child
            // with the colliding name.
            let foo_tx2 = foo_tx.clone();
            ctx.run("foo", runnable_fn(move |fctx: RunContext| {
                let foo_tx = foo_tx2.clone();
                async move {
                    let verdict = async {
                        let sl = fctx
                            .sub_logger("dut")
                            .await
                            .map_err(|e| format!("creating sub-logger: {e}"))?;
                        sl.info("hello from foo.dut");
                        if sl.dn() != "root.foo.dut" {
                            return Err(format!("unexpected sub-logger dn {}", sl.dn()));
                        }
                        let colliding = fctx
                            .run(
                                "dut",
                                runnable_fn(|c: RunContext| async move {
                                    c.signal(Signal::Healthy).await?;
                                    c.cancelled().await;
                                    Err(RunnableError::Canceled)
                                }),
                            )
                            .await;
                        match colliding {
                            Err(SupervisorError::NameTaken { .. }) => Ok(()),
                            Err(e) => Err(format!("unexpected error kind: {e}")),
                            Ok(()) => Err("colliding runnable should have failed".to_string()),
                        }
                    }
                    .await;
                    if let Some(tx) = foo_tx.lock().await.take() {
                        let _ = tx.send(verdict);
                    }
                    fctx.signal(Signal::Healthy).await?;
                    fctx.signal(Signal::Done).await?;
                    Ok(())
                }
            }))
            .await?;

            // The root now tries to reserve the name of its child.
            let verdict = match ctx.sub_logger("foo").await {
                Err(SupervisorError::NameTaken { .. }) => Ok(()),
                Err(e) => Err(format!("unexpected error kind: {e}")),
                Ok(_) => Err("colliding sub-logger should have failed".to_string()),
            };
            if let Some(tx) = root_tx.lock().await.take() {
                let _ = tx.send(verdict);
            }
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    timeout(WAIT, foo_rx)
        .await
        .expect("foo verdict timeout")
        .expect("foo verdict channel")
        .unwrap_or_else(|e| panic!("from root.foo: {e}"));
    timeout(WAIT, root_rx)
        .await
        .expect("root verdict timeout")
        .expect("root verdict channel")
        .unwrap_or_else(|e| panic!("from root: {e}"));

    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Duplicate sibling names are rejected synchronously.
#[tokio::test]
async fn duplicate_child_names_are_rejected() {
    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let tx = tx.clone();
        async move {
            let child = runnable_fn(|c: RunContext| async move {
                c.signal(Signal::Healthy).await?;
                c.cancelled().await;
                Err(RunnableError::Canceled)
            });
            ctx.run("dup", child.clone()).await?;
            let verdict = match ctx.run("dup", child).await {
                Err(SupervisorError::NameTaken { .. }) => Ok(()),
                Err(e) => Err(format!("unexpected error kind: {e}")),
                Ok(()) => Err("duplicate child should have failed".to_string()),
            };
            if let Some(tx) = tx.lock().await.take() {
                let _ = tx.send(verdict);
            }
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    timeout(WAIT, rx)
        .await
        .expect("verdict timeout")
        .expect("verdict channel")
        .unwrap_or_else(|e| panic!("{e}"));
    sup.shutdown(WAIT).await.expect("shutdown");
}

/// Resilience: misbehaving siblings (signalling done before healthy,
/// busy-looping, panicking repeatedly) never take down a well-behaved
/// runnable.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tree_survives_misbehaving_runnables() {
    let (ping_tx, ping_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
    let ping_rx = Arc::new(Mutex::new(ping_rx));
    let (sibling, sibling_runnable) = Rc::new();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let ping_rx = ping_rx.clone();
        let sibling = sibling_runnable.clone();
        async move {
            // A well-behaved responder grouped with the panicky sibling.
            let responder = {
                let ping_rx = ping_rx.clone();
                runnable_fn(move |c: RunContext| {
                    let ping_rx = ping_rx.clone();
                    async move {
                        c.signal(Signal::Healthy).await?;
                        let mut rx = ping_rx.lock().await;
                        loop {
                            tokio::select! {
                                _ = c.cancelled() => return Err(RunnableError::Canceled),
                                req = rx.recv() => match req {
                                    Some(reply) => { let _ = reply.send(()); }
                                    None => return Err(RunnableError::Canceled),
                                },
                            }
                        }
                    }
                })
            };
            ctx.run_group(vec![("one", responder), ("one-sibling", sibling)])
                .await?;

            // A runnable that signals done before healthy (programming
            // error; it dies and retries forever).
            ctx.run(
                "two",
                runnable_fn(|c: RunContext| async move {
                    c.signal(Signal::Done).await?;
                    Ok(())
                }),
            )
            .await?;
            // A runnable that never checks its context.
            ctx.run(
                "three",
                runnable_fn(|_c: RunContext| async move {
                    loop {
                        tokio::task::yield_now().await;
                    }
                }),
            )
            .await?;

            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    let ping = |label: &'static str| {
        let ping_tx = ping_tx.clone();
        async move {
            let (reply, rx) = oneshot::channel();
            timeout(WAIT, ping_tx.send(reply))
                .await
                .expect("ping send timeout")
                .expect("responder gone");
            timeout(Duration::from_secs(1), rx)
                .await
                .unwrap_or_else(|_| panic!("ping response timeout ({label})"))
                .expect("ping reply dropped");
        }
    };

    for _ in 0..5 {
        sibling.become_healthy().await;
        sibling.wait_state(RcState::Healthy).await;
        ping("steady").await;
        sibling.panic_now().await;
        // Wait for the group to come back.
        sibling.wait_state(RcState::New).await;
        ping("after sibling panic").await;
    }

    sup.cancel();
}

/// Shutdown cancels the whole tree and waits for every runnable to
/// exit.
#[tokio::test]
async fn shutdown_drains_the_tree() {
    let (h_tx, mut h) = mpsc::unbounded_channel();
    let (d_tx, mut d) = mpsc::unbounded_channel();

    let sup = Supervisor::start(SupervisorOptions::default(), move |ctx: RunContext| {
        let child = runnable_spawns_more(Some(h_tx.clone()), Some(d_tx.clone()), 2);
        async move {
            ctx.run("child", child).await?;
            ctx.signal(Signal::Healthy).await?;
            ctx.signal(Signal::Done).await?;
            Ok(())
        }
    });

    recv(&mut h, "subtree to become healthy").await;
    sup.shutdown(WAIT).await.expect("shutdown");
    recv(&mut d, "subtree to observe cancellation").await;
    // Either the drained list is empty or the processor already exited.
    let live = sup.live_runnables().await.unwrap_or_default();
    assert!(live.is_empty(), "still live after shutdown: {live:?}");
}
