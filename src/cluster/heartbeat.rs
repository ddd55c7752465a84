//! # Heartbeat pusher.
//!
//! Holds a bidirectional heartbeat stream to the curator leader: one
//! update per period, replies consumed one-for-one. Any stream error
//! surfaces to the supervisor, which restarts the runnable with backoff
//! — redialing naturally lands on the current leader.

use std::time::Duration;

use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tonic::transport::Channel;

use crate::error::RunnableError;
use crate::proto;
use crate::proto::curator_client::CuratorClient;
use crate::supervisor::{BoxRunnableFuture, RunContext, Runnable, Signal};

/// Default interval between heartbeat updates. Well under the leader's
/// heartbeat timeout, so a single lost update does not flag the node.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(2);

/// Supervised heartbeat loop of one node.
#[derive(Clone)]
pub struct Heartbeater {
    client: CuratorClient<Channel>,
    period: Duration,
}

impl Heartbeater {
    pub fn new(client: CuratorClient<Channel>) -> Self {
        Self {
            client,
            period: HEARTBEAT_PERIOD,
        }
    }

    /// Overrides the heartbeat period (tests use short ones).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    async fn run_loop(mut self, ctx: RunContext) -> Result<(), RunnableError> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let outbound = IntervalStream::new(interval).map(|_| proto::HeartbeatUpdateRequest {});

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(RunnableError::Canceled),
            res = self.client.heartbeat(outbound) => res?,
        };
        let mut inbound = response.into_inner();
        ctx.signal(Signal::Healthy).await?;

        loop {
            let msg = tokio::select! {
                _ = ctx.cancelled() => return Err(RunnableError::Canceled),
                msg = inbound.message() => msg,
            };
            match msg {
                Ok(Some(_)) => {
                    // One reply per update sent; nothing to do with it.
                }
                Ok(None) => {
                    return Err(RunnableError::failed("heartbeat stream closed by leader"));
                }
                Err(status) => return Err(status.into()),
            }
        }
    }
}

impl Runnable for Heartbeater {
    fn run(&self, ctx: RunContext) -> BoxRunnableFuture {
        let this = self.clone();
        Box::pin(this.run_loop(ctx))
    }
}
