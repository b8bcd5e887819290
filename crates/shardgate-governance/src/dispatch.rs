//! Per-schema renewal dispatch
//!
//! Each schema (and the global properties) gets one bounded queue drained
//! by one renewal task, so changes to a schema apply in arrival order and
//! a slow renewal only backs up its own schema. Forwarder tasks move
//! decoded registry notifications into the queues; a full queue makes the
//! forwarder wait.

use crate::contexts::MetadataContexts;
use crate::event::ChangeEvent;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use shardgate_common::{Error, Result};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Queue key: a schema name, or `None` for global properties
type QueueKey = Option<String>;

struct Queue {
    sender: mpsc::Sender<ChangeEvent>,
    worker: JoinHandle<()>,
}

struct Queues {
    contexts: Arc<MetadataContexts>,
    capacity: usize,
    queues: Mutex<HashMap<QueueKey, Queue>>,
    closed: AtomicBool,
}

impl Queues {
    /// Sender of the queue for `key`, starting its renewal task on first use
    fn sender(&self, key: QueueKey) -> Result<mpsc::Sender<ChangeEvent>> {
        let mut queues = self.queues.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if let Some(queue) = queues.get(&key) {
            return Ok(queue.sender.clone());
        }
        let (sender, mut receiver) = mpsc::channel::<ChangeEvent>(self.capacity);
        let contexts = Arc::clone(&self.contexts);
        let label = key.clone().unwrap_or_else(|| "props".to_string());
        let worker = tokio::spawn(async move {
            debug!("Renewal task for {} started", label);
            while let Some(event) = receiver.recv().await {
                let kind = event.kind();
                // rejections are logged and counted by `renew`
                if AssertUnwindSafe(contexts.renew(event)).catch_unwind().await.is_err() {
                    contexts.metrics().record_rejected(kind);
                    error!("Renewal of {} change for {} panicked, change dropped", kind, label);
                }
            }
            debug!("Renewal task for {} stopped", label);
        });
        queues.insert(
            key,
            Queue {
                sender: sender.clone(),
                worker,
            },
        );
        Ok(sender)
    }

    async fn send(&self, event: ChangeEvent) -> Result<()> {
        let sender = self.sender(event.schema().map(str::to_string))?;
        sender.send(event).await.map_err(|_| Error::Closed)
    }
}

/// Routes change notifications to per-schema renewal tasks
pub struct RenewalDispatcher {
    queues: Arc<Queues>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl RenewalDispatcher {
    pub fn new(contexts: Arc<MetadataContexts>, capacity: usize) -> Self {
        Self {
            queues: Arc::new(Queues {
                contexts,
                capacity: capacity.max(1),
                queues: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Queue one change, waiting while its queue is full
    pub async fn dispatch(&self, event: ChangeEvent) -> Result<()> {
        self.queues.send(event).await
    }

    /// Forward every event of `stream` into the matching queue
    pub fn forward(&self, mut stream: BoxStream<'static, ChangeEvent>) {
        let queues = Arc::clone(&self.queues);
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if queues.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.forwarders.lock().push(handle);
    }

    /// Stop forwarding, apply what is already queued, then stop the
    /// renewal tasks
    pub async fn shutdown(&self) {
        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        for forwarder in &forwarders {
            forwarder.abort();
        }
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let queues: Vec<Queue> = {
            let mut queues = self.queues.queues.lock();
            self.queues.closed.store(true, Ordering::Release);
            queues.drain().map(|(_, queue)| queue).collect()
        };
        for Queue { sender, worker } in queues {
            drop(sender);
            let _ = worker.await;
        }
        info!("Renewal dispatcher stopped");
    }
}

impl Drop for RenewalDispatcher {
    /// Abort whatever [`shutdown`](Self::shutdown) did not stop; queued
    /// changes are discarded
    fn drop(&mut self) {
        for forwarder in self.forwarders.get_mut().drain(..) {
            forwarder.abort();
        }
        for (_, queue) in self.queues.queues.lock().drain() {
            queue.worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use crate::metrics::RenewalMetrics;
    use crate::pool::{DataSourceFactory, DataSourcePool, MemoryDataSourceFactory};
    use async_trait::async_trait;
    use shardgate_common::{
        ConfigurationProperties, DataSourceConfig, DataSourceMap, GovernanceSchema, ShardingRuleConfig,
        ShardingTableRuleConfig,
    };
    use std::collections::BTreeMap;

    /// Panics on `panic:` urls, opens memory pools otherwise
    #[derive(Default)]
    struct PanickingFactory {
        inner: MemoryDataSourceFactory,
    }

    #[async_trait]
    impl DataSourceFactory for PanickingFactory {
        async fn open(&self, name: &str, config: &DataSourceConfig) -> Result<Box<dyn DataSourcePool>> {
            assert!(!config.url.starts_with("panic:"), "driver crashed opening {name}");
            self.inner.open(name, config).await
        }
    }

    fn data_sources(names: &[&str]) -> DataSourceMap {
        names
            .iter()
            .map(|n| ((*n).to_string(), DataSourceConfig::new("h2", format!("jdbc:h2:mem:{n}"))))
            .collect()
    }

    async fn contexts() -> Arc<MetadataContexts> {
        contexts_with(Arc::new(MemoryDataSourceFactory::new())).await
    }

    async fn contexts_with(factory: Arc<dyn DataSourceFactory>) -> Arc<MetadataContexts> {
        let contexts = MetadataContexts::new(
            factory,
            ConfigurationProperties::default(),
            Arc::new(RenewalMetrics::new()),
        );
        contexts.add_schema("logic_db", &data_sources(&["ds_0"]), &[]).await.unwrap();
        Arc::new(contexts)
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_changes() {
        let contexts = contexts().await;
        let dispatcher = RenewalDispatcher::new(Arc::clone(&contexts), 2);
        for n in 1..=3 {
            let names: Vec<String> = (0..=n).map(|i| format!("ds_{i}")).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            dispatcher
                .dispatch(ChangeEvent::DataSourceChanged {
                    schema: "logic_db".into(),
                    data_sources: data_sources(&names),
                })
                .await
                .unwrap();
        }
        dispatcher
            .dispatch(ChangeEvent::PropertiesChanged {
                props: BTreeMap::from([("sql-show".to_string(), "true".to_string())]),
            })
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let metadata = contexts.metadata("logic_db").unwrap();
        assert_eq!(metadata.data_source_names().len(), 4);
        assert_eq!(metadata.version(), 4);
        assert_eq!(contexts.props().get("sql-show"), Some("true"));

        let err = dispatcher
            .dispatch(ChangeEvent::PropertiesChanged { props: BTreeMap::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_forward_stream() {
        let contexts = contexts().await;
        let dispatcher = RenewalDispatcher::new(Arc::clone(&contexts), 8);
        let target = GovernanceSchema::new("logic_db", "ds_0");
        let events = vec![
            ChangeEvent::DisabledStateChanged {
                target: target.clone(),
                disabled: true,
            },
            ChangeEvent::DisabledStateChanged {
                target: target.clone(),
                disabled: true,
            },
        ];
        dispatcher.forward(futures::stream::iter(events).boxed());

        for _ in 0..100 {
            if contexts.metrics().unchanged(ChangeKind::Disabled) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(contexts.metrics().applied(ChangeKind::Disabled), 1);
        assert_eq!(contexts.metrics().unchanged(ChangeKind::Disabled), 1);
        assert!(!contexts.is_routable("logic_db", "ds_0"));

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_expression_rejects_only_that_change() {
        let contexts = contexts().await;
        let dispatcher = RenewalDispatcher::new(Arc::clone(&contexts), 8);
        let rules = vec![
            ShardingRuleConfig::default()
                .with_table(ShardingTableRuleConfig::new(
                    "t_order",
                    "ds_${0..9223372036854775807}.t_order",
                ))
                .into(),
        ];
        dispatcher
            .dispatch(ChangeEvent::RuleConfigurationsChanged {
                schema: "logic_db".into(),
                rules,
            })
            .await
            .unwrap();
        dispatcher
            .dispatch(ChangeEvent::DataSourceChanged {
                schema: "logic_db".into(),
                data_sources: data_sources(&["ds_0", "ds_1"]),
            })
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let metadata = contexts.metadata("logic_db").unwrap();
        assert!(metadata.rules().is_empty());
        assert_eq!(metadata.data_source_names().len(), 2);
        assert_eq!(contexts.metrics().rejected(ChangeKind::Rules), 1);
    }

    #[tokio::test]
    async fn test_panicking_renewal_keeps_queue_alive() {
        let contexts = contexts_with(Arc::new(PanickingFactory::default())).await;
        let dispatcher = RenewalDispatcher::new(Arc::clone(&contexts), 8);

        let mut crashing = data_sources(&["ds_0"]);
        crashing.insert("ds_1".into(), DataSourceConfig::new("h2", "panic:ds_1"));
        dispatcher
            .dispatch(ChangeEvent::DataSourceChanged {
                schema: "logic_db".into(),
                data_sources: crashing,
            })
            .await
            .unwrap();
        dispatcher
            .dispatch(ChangeEvent::DataSourceChanged {
                schema: "logic_db".into(),
                data_sources: data_sources(&["ds_0", "ds_2"]),
            })
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let metadata = contexts.metadata("logic_db").unwrap();
        assert_eq!(
            metadata.data_source_names().into_iter().collect::<Vec<_>>(),
            vec!["ds_0", "ds_2"]
        );
        assert_eq!(metadata.version(), 2);
        assert_eq!(contexts.metrics().rejected(ChangeKind::DataSources), 1);
    }
}
