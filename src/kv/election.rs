//! # Leader-election seam.
//!
//! A curator instance campaigns on a well-known election key; the
//! winner receives a [`LeaderGuard`] naming the lock key and its
//! modification revision. Every subsequent curator write is guarded by
//! `Compare(lock_key.mod_rev == lock_rev)`, so a deposed leader's
//! writes fail even if it has not yet noticed losing the lock.
//!
//! [`MemoryElector`] queues campaigners in-process on top of
//! [`MemoryKv`]; a production deployment implements [`LeaderElector`]
//! over the replicated store's lease/campaign primitives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::memory::MemoryKv;
use super::store::{KvError, KvStore, Revision};

/// Identity of a won election.
#[derive(Clone, Debug)]
pub struct LeaderLock {
    /// Key the election was decided on.
    pub lock_key: String,
    /// Modification revision of the winning write; the fencing token
    /// for all of this leader's transactions.
    pub lock_rev: Revision,
}

/// Held leadership. Dropping the guard resigns.
pub struct LeaderGuard {
    lock: LeaderLock,
    lost: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl LeaderGuard {
    pub fn new(lock: LeaderLock, lost: CancellationToken) -> Self {
        Self {
            lock,
            lost,
            _permit: None,
        }
    }

    pub fn lock(&self) -> &LeaderLock {
        &self.lock
    }

    /// Token canceled when leadership is lost (lease expiry, revocation,
    /// resignation).
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Marks this leadership as externally revoked. Test hook and
    /// administrative escape hatch; guarded transactions fence stale
    /// writes regardless.
    pub fn revoke(&self) {
        self.lost.cancel();
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.lost.cancel();
    }
}

/// Campaigns for cluster leadership.
#[async_trait]
pub trait LeaderElector: Send + Sync + 'static {
    /// Blocks until this candidate wins the election, then returns the
    /// held leadership.
    async fn campaign(&self, candidate: &str) -> Result<LeaderGuard, KvError>;
}

/// In-process elector: campaigners queue on a semaphore; the winner
/// records itself on the election key in the backing [`MemoryKv`].
pub struct MemoryElector {
    kv: MemoryKv,
    election_key: String,
    slot: Arc<Semaphore>,
}

impl MemoryElector {
    pub fn new(kv: MemoryKv, election_key: impl Into<String>) -> Self {
        Self {
            kv,
            election_key: election_key.into(),
            slot: Arc::new(Semaphore::new(1)),
        }
    }
}

#[async_trait]
impl LeaderElector for MemoryElector {
    async fn campaign(&self, candidate: &str) -> Result<LeaderGuard, KvError> {
        let permit = self
            .slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| KvError::Unavailable("elector closed".to_string()))?;
        let lock_rev = self
            .kv
            .put(&self.election_key, candidate.as_bytes().to_vec())
            .await?;
        let mut guard = LeaderGuard::new(
            LeaderLock {
                lock_key: self.election_key.clone(),
                lock_rev,
            },
            CancellationToken::new(),
        );
        guard._permit = Some(permit);
        Ok(guard)
    }
}
