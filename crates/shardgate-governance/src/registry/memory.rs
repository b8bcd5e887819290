//! In-process registry repository

use super::{RegistryRepository, WatchEvent};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use shardgate_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const WATCH_CAPACITY: usize = 1024;

/// Key/value state shared by every repository of one namespace
pub(crate) struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::with_capacity(WATCH_CAPACITY)
    }

    /// Store whose change feed buffers `capacity` events per watcher
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            data: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn publish(&self, event: WatchEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Current entries under `prefix` as puts
    fn snapshot(&self, prefix: &str) -> VecDeque<WatchEvent> {
        self.data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| WatchEvent::Put {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// State of one watch stream
struct Watch {
    store: Arc<MemoryStore>,
    prefix: String,
    events: broadcast::Receiver<WatchEvent>,
    closed: watch::Receiver<bool>,
    /// Entries replayed after the watcher fell behind
    resync: VecDeque<WatchEvent>,
}

impl Watch {
    async fn next(mut self) -> Option<(WatchEvent, Self)> {
        loop {
            let is_closed = *self.closed.borrow();
            if is_closed {
                return None;
            }
            if let Some(event) = self.resync.pop_front() {
                return Some((event, self));
            }
            tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                received = self.events.recv() => match received {
                    Ok(event) if event.key().starts_with(self.prefix.as_str()) => return Some((event, self)),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // resubscribe before reading so no later write is lost
                        warn!("Registry watch on {} lagged by {} events, resyncing", self.prefix, skipped);
                        self.events = self.events.resubscribe();
                        self.resync = self.store.snapshot(&self.prefix);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    }
}

/// One connection to an in-process registry namespace
pub struct MemoryRegistryRepository {
    store: Arc<MemoryStore>,
    closed: watch::Sender<bool>,
}

impl MemoryRegistryRepository {
    pub(crate) fn new(store: Arc<MemoryStore>) -> Self {
        let (closed, _) = watch::channel(false);
        Self { store, closed }
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() {
            Err(Error::registry_unavailable("memory registry connection is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryRepository for MemoryRegistryRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.store.data.read().get(key).cloned())
    }

    async fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        // publish under the guard so watchers see writes in store order
        let mut data = self.store.data.write();
        data.insert(key.to_string(), value.to_string());
        self.store.publish(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        drop(data);
        debug!("Registry put {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut data = self.store.data.write();
        if data.remove(key).is_some() {
            self.store.publish(WatchEvent::Delete { key: key.to_string() });
            drop(data);
            debug!("Registry delete {}", key);
        }
        Ok(())
    }

    async fn children(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let data = self.store.data.read();
        let children: BTreeSet<String> = data
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn watch(&self, prefix: &str) -> Result<BoxStream<'static, WatchEvent>> {
        self.ensure_open()?;
        let state = Watch {
            store: Arc::clone(&self.store),
            prefix: prefix.to_string(),
            events: self.store.events.subscribe(),
            closed: self.closed.subscribe(),
            resync: VecDeque::new(),
        };
        Ok(futures::stream::unfold(state, Watch::next).boxed())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.send_replace(true) {
            debug!("Memory registry connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn repository(store: &Arc<MemoryStore>) -> MemoryRegistryRepository {
        MemoryRegistryRepository::new(Arc::clone(store))
    }

    #[tokio::test]
    async fn test_get_persist_delete() {
        let store = Arc::new(MemoryStore::new());
        let repo = repository(&store);
        assert_eq!(repo.get("/props").await.unwrap(), None);
        repo.persist("/props", "{}").await.unwrap();
        assert_eq!(repo.get("/props").await.unwrap().as_deref(), Some("{}"));

        // a second connection to the same namespace sees the value
        assert!(repository(&store).get("/props").await.unwrap().is_some());

        repo.delete("/props").await.unwrap();
        assert_eq!(repo.get("/props").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_children() {
        let repo = repository(&Arc::new(MemoryStore::new()));
        repo.persist("/states/datanodes/logic_db.r0", "DISABLED").await.unwrap();
        repo.persist("/states/datanodes/logic_db.r1", "ENABLED").await.unwrap();
        repo.persist("/metadata/logic_db/rules", "[]").await.unwrap();
        repo.persist("/metadata/logic_db/dataSources", "{}").await.unwrap();

        assert_eq!(
            repo.children("/states/datanodes").await.unwrap(),
            vec!["logic_db.r0", "logic_db.r1"]
        );
        assert_eq!(repo.children("/metadata/").await.unwrap(), vec!["logic_db"]);
        assert!(repo.children("/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_filters_prefix() {
        let store = Arc::new(MemoryStore::new());
        let repo = repository(&store);
        let mut stream = repo.watch("/metadata/logic_db").await.unwrap();

        let writer = repository(&store);
        writer.persist("/props", "{}").await.unwrap();
        writer.persist("/metadata/logic_db/rules", "[]").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key(), "/metadata/logic_db/rules");
    }

    #[tokio::test]
    async fn test_close_ends_watch_and_rejects_calls() {
        let repo = repository(&Arc::new(MemoryStore::new()));
        let mut stream = repo.watch("/").await.unwrap();
        repo.close().await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert!(next.is_none());
        assert!(repo.get("/props").await.unwrap_err().is_fatal());
        assert!(repo.persist("/props", "{}").await.is_err());
    }

    #[tokio::test]
    async fn test_lagged_watch_resyncs_latest_value() {
        let store = Arc::new(MemoryStore::with_capacity(4));
        let repo = repository(&store);
        let key = "/metadata/logic_db/dataSources";
        let mut stream = repo.watch(key).await.unwrap();

        for i in 0..20 {
            repo.persist(key, &format!("v{i}")).await.unwrap();
            repo.persist("/props", "{}").await.unwrap();
        }

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WatchEvent::Put {
                key: key.to_string(),
                value: "v19".to_string()
            }
        );

        repo.persist(key, "v20").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WatchEvent::Put {
                key: key.to_string(),
                value: "v20".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_announced_in_store_order() {
        let store = Arc::new(MemoryStore::new());
        let key = "/metadata/logic_db/rules";
        let mut stream = repository(&store).watch(key).await.unwrap();

        let writers: Vec<_> = (0..2)
            .map(|w| {
                let repo = repository(&store);
                tokio::spawn(async move {
                    for i in 0..100 {
                        repo.persist(key, &format!("w{w}-{i}")).await.unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mut last = None;
        for _ in 0..200 {
            let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap();
            last = Some(event);
        }
        let stored = repository(&store).get(key).await.unwrap().unwrap();
        assert_eq!(
            last,
            Some(WatchEvent::Put {
                key: key.to_string(),
                value: stored
            })
        );
    }
}
