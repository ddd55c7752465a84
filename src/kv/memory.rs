//! # In-memory KvStore.
//!
//! Single-process implementation of [`KvStore`] with real revision and
//! watch semantics. Backs tests and local development; a production
//! cluster plugs the replicated store into the same trait.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::store::{Compare, KvEntry, KvError, KvEvent, KvStore, KvWatcher, Op, Revision};

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<KvEvent>,
}

#[derive(Default)]
struct Inner {
    revision: Revision,
    entries: BTreeMap<String, (Vec<u8>, Revision)>,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn notify(&mut self, event: &KvEvent) {
        let key = match event {
            KvEvent::Put(e) => &e.key,
            KvEvent::Delete { key, .. } => key,
        };
        self.watchers
            .retain(|w| !key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
    }

    fn apply_put(&mut self, key: &str, value: Vec<u8>) -> Revision {
        self.revision += 1;
        let rev = self.revision;
        self.entries.insert(key.to_string(), (value.clone(), rev));
        self.notify(&KvEvent::Put(KvEntry {
            key: key.to_string(),
            value,
            mod_revision: rev,
        }));
        rev
    }

    fn apply_delete(&mut self, key: &str) -> Option<Revision> {
        if self.entries.remove(key).is_none() {
            return None;
        }
        self.revision += 1;
        let rev = self.revision;
        self.notify(&KvEvent::Delete {
            key: key.to_string(),
            revision: rev,
        });
        Some(rev)
    }
}

/// In-process [`KvStore`] with revisions and watches.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, KvError> {
        self.inner
            .lock()
            .map_err(|_| KvError::Unavailable("store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let inner = self.lock()?;
        Ok(inner.entries.get(key).map(|(value, rev)| KvEntry {
            key: key.to_string(),
            value: value.clone(),
            mod_revision: *rev,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<(Vec<KvEntry>, Revision), KvError> {
        let inner = self.lock()?;
        let entries = inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, rev))| KvEntry {
                key: k.clone(),
                value: v.clone(),
                mod_revision: *rev,
            })
            .collect();
        Ok((entries, inner.revision))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Revision, KvError> {
        let mut inner = self.lock()?;
        Ok(inner.apply_put(key, value))
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut inner = self.lock()?;
        Ok(inner.apply_delete(key).is_some())
    }

    async fn txn(&self, compare: Compare, ops: Vec<Op>) -> Result<bool, KvError> {
        let mut inner = self.lock()?;
        let holds = match &compare {
            Compare::ModRevision { key, revision } => {
                inner.entries.get(key).map(|(_, rev)| *rev) == Some(*revision)
            }
        };
        if !holds {
            return Ok(false);
        }
        for op in ops {
            match op {
                Op::Put { key, value } => {
                    inner.apply_put(&key, value);
                }
                Op::Delete { key } => {
                    inner.apply_delete(&key);
                }
            }
        }
        Ok(true)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatcher, KvError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(KvWatcher::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_bumps_revision_and_get_returns_latest() {
        let kv = MemoryKv::new();
        let r1 = kv.put("/a", b"1".to_vec()).await.unwrap();
        let r2 = kv.put("/a", b"2".to_vec()).await.unwrap();
        assert!(r2 > r1);
        let entry = kv.get("/a").await.unwrap().unwrap();
        assert_eq!(entry.value, b"2");
        assert_eq!(entry.mod_revision, r2);
    }

    #[tokio::test]
    async fn get_prefix_scans_in_order() {
        let kv = MemoryKv::new();
        kv.put("/nodes/b", b"b".to_vec()).await.unwrap();
        kv.put("/nodes/a", b"a".to_vec()).await.unwrap();
        kv.put("/other", b"x".to_vec()).await.unwrap();
        let (entries, rev) = kv.get_prefix("/nodes/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "/nodes/a");
        assert_eq!(entries[1].key, "/nodes/b");
        assert_eq!(rev, 3);
    }

    #[tokio::test]
    async fn txn_guard_holds_only_on_matching_revision() {
        let kv = MemoryKv::new();
        let rev = kv.put("/lock", b"me".to_vec()).await.unwrap();

        let ok = kv
            .txn(
                Compare::ModRevision {
                    key: "/lock".to_string(),
                    revision: rev,
                },
                vec![Op::Put {
                    key: "/data".to_string(),
                    value: b"v".to_vec(),
                }],
            )
            .await
            .unwrap();
        assert!(ok);
        assert!(kv.get("/data").await.unwrap().is_some());

        // A competing write moved the lock; the old guard must fail.
        kv.put("/lock", b"other".to_vec()).await.unwrap();
        let ok = kv
            .txn(
                Compare::ModRevision {
                    key: "/lock".to_string(),
                    revision: rev,
                },
                vec![Op::Put {
                    key: "/data".to_string(),
                    value: b"stale".to_vec(),
                }],
            )
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(kv.get("/data").await.unwrap().unwrap().value, b"v");
    }

    #[tokio::test]
    async fn watch_sees_puts_and_deletes_in_order() {
        let kv = MemoryKv::new();
        let mut w = kv.watch_prefix("/nodes/").await.unwrap();
        kv.put("/nodes/x", b"1".to_vec()).await.unwrap();
        kv.put("/elsewhere", b"?".to_vec()).await.unwrap();
        kv.delete("/nodes/x").await.unwrap();

        match w.next().await.unwrap() {
            KvEvent::Put(e) => assert_eq!(e.key, "/nodes/x"),
            other => panic!("unexpected event: {other:?}"),
        }
        match w.next().await.unwrap() {
            KvEvent::Delete { key, .. } => assert_eq!(key, "/nodes/x"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
