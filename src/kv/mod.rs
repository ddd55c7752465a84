//! Replicated KV and leader-election seams.
//!
//! The curator's durable state lives in an external replicated
//! key-value store reached only through the narrow [`KvStore`] trait
//! (get/put/delete, guarded transactions, prefix watch); leader
//! election goes through [`LeaderElector`]. Keeping both seams small
//! lets tests and local development substitute the in-process
//! [`MemoryKv`]/[`MemoryElector`] implementations for the real cluster
//! store.

mod election;
mod memory;
mod store;

pub use election::{LeaderElector, LeaderGuard, LeaderLock, MemoryElector};
pub use memory::MemoryKv;
pub use store::{Compare, KvEntry, KvError, KvEvent, KvStore, KvWatcher, Op, Revision};
