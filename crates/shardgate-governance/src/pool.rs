//! Data source pool lifecycle
//!
//! Physical connection pools are opened through a [`DataSourceFactory`].
//! Each opened pool is wrapped in a [`PooledDataSource`] that closes it when
//! the last holder drops: snapshots, in-flight connections and renewal plans
//! all share the same `Arc`, so a data source removed by a renewal stays
//! open until nothing references it anymore.

use crate::metrics::RenewalMetrics;
use async_trait::async_trait;
use shardgate_common::{DataSourceConfig, Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};

/// A physical connection pool
pub trait DataSourcePool: Send + Sync {
    /// Check out one connection slot
    fn acquire(&self) -> Result<()>;

    /// Return a slot taken by [`acquire`](Self::acquire)
    fn release(&self);

    /// Connections currently checked out
    fn active_connections(&self) -> usize;

    /// Close the pool; later acquisitions fail
    fn close(&self);
}

/// Opens physical pools from data source descriptors
#[async_trait]
pub trait DataSourceFactory: Send + Sync {
    async fn open(&self, name: &str, config: &DataSourceConfig) -> Result<Box<dyn DataSourcePool>>;
}

/// An open pool together with the descriptor it was opened from
pub struct PooledDataSource {
    name: String,
    config: DataSourceConfig,
    pool: Box<dyn DataSourcePool>,
    metrics: Arc<RenewalMetrics>,
}

impl PooledDataSource {
    /// Open `config` through `factory`
    pub async fn open(
        factory: &dyn DataSourceFactory,
        name: &str,
        config: &DataSourceConfig,
        metrics: Arc<RenewalMetrics>,
    ) -> Result<Arc<Self>> {
        let pool = factory.open(name, config).await?;
        metrics.record_pool_opened();
        info!("Opened data source pool {} ({})", name, config.url);
        Ok(Arc::new(Self {
            name: name.to_string(),
            config: config.clone(),
            pool,
            metrics,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn active_connections(&self) -> usize {
        self.pool.active_connections()
    }

    /// Check out a physical connection
    pub fn connection(self: &Arc<Self>) -> Result<PhysicalConnection> {
        self.pool.acquire()?;
        Ok(PhysicalConnection {
            pool: Arc::clone(self),
        })
    }
}

impl fmt::Debug for PooledDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledDataSource")
            .field("name", &self.name)
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledDataSource {
    fn drop(&mut self) {
        self.pool.close();
        self.metrics.record_pool_closed();
        info!("Closed data source pool {}", self.name);
    }
}

/// A checked-out connection; returns its slot on drop
#[derive(Debug)]
pub struct PhysicalConnection {
    pool: Arc<PooledDataSource>,
}

impl PhysicalConnection {
    pub fn data_source(&self) -> &str {
        self.pool.name()
    }

    pub fn url(&self) -> &str {
        &self.pool.config().url
    }
}

impl Drop for PhysicalConnection {
    fn drop(&mut self) {
        self.pool.pool.release();
    }
}

/// In-process pool used by standalone deployments and tests
#[derive(Debug)]
pub struct MemoryDataSourcePool {
    name: String,
    max_size: usize,
    active: AtomicUsize,
    closed: AtomicBool,
    open_pools: Arc<AtomicUsize>,
}

impl DataSourcePool for MemoryDataSourcePool {
    fn acquire(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_size).then_some(n + 1))
            .map_err(|_| Error::DataSourceOpen {
                name: self.name.clone(),
                reason: format!("pool exhausted ({} connections)", self.max_size),
            })?;
        Ok(())
    }

    fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.open_pools.fetch_sub(1, Ordering::AcqRel);
            debug!("Memory pool {} closed", self.name);
        }
    }
}

/// Factory for [`MemoryDataSourcePool`]s.
///
/// Descriptors whose url starts with `unreachable:` fail to open, which
/// lets callers exercise open failures.
#[derive(Debug, Default)]
pub struct MemoryDataSourceFactory {
    opened: AtomicUsize,
    open_pools: Arc<AtomicUsize>,
}

impl MemoryDataSourceFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pools opened over the factory's lifetime
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    /// Pools opened and not yet closed
    pub fn open_pools(&self) -> usize {
        self.open_pools.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DataSourceFactory for MemoryDataSourceFactory {
    async fn open(&self, name: &str, config: &DataSourceConfig) -> Result<Box<dyn DataSourcePool>> {
        if config.url.starts_with("unreachable:") {
            return Err(Error::DataSourceOpen {
                name: name.to_string(),
                reason: format!("cannot reach {}", config.url),
            });
        }
        self.opened.fetch_add(1, Ordering::AcqRel);
        self.open_pools.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryDataSourcePool {
            name: name.to_string(),
            max_size: config.pool.max_size as usize,
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            open_pools: Arc::clone(&self.open_pools),
        }))
    }
}
