//! Sharding data source facade
//!
//! The object applications hold. It hands out connections bound to the
//! currently published snapshot and gates the administrative operations
//! it does not implement.
//!
//! | Operation | Support |
//! |---|---|
//! | `getConnection` | delegated to the active snapshot |
//! | `getLoginTimeout` | unsupported |
//! | `setLoginTimeout` | unsupported |
//! | `getLogWriter` / `setLogWriter` | supported, facade-local |
//! | `close` | supported |

use crate::context::MetadataContext;
use crate::contexts::{self, MetadataContexts};
use crate::disabled::DisabledState;
use crate::mode::Mode;
use crate::pool::PhysicalConnection;
use crate::registry::RegistryCenter;
use derive_more::Display;
use parking_lot::{Mutex, RwLock};
use shardgate_common::{ConfigurationProperties, Error, ModeType, Result};
use shardgate_rule::{DataNode, ShardingValue};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Destination for facade log lines
pub type LogWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Administrative operations of the facade
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AdminOperation {
    #[display("getConnection")]
    GetConnection,
    #[display("getLoginTimeout")]
    GetLoginTimeout,
    #[display("setLoginTimeout")]
    SetLoginTimeout,
    #[display("getLogWriter")]
    GetLogWriter,
    #[display("setLogWriter")]
    SetLogWriter,
    #[display("close")]
    Close,
}

/// How the facade handles an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    /// Served from the active snapshot
    Delegated,
    /// Served by the facade itself
    Supported,
    /// Always fails with `OperationNotSupported`
    Unsupported,
}

impl AdminOperation {
    pub const ALL: [Self; 6] = [
        Self::GetConnection,
        Self::GetLoginTimeout,
        Self::SetLoginTimeout,
        Self::GetLogWriter,
        Self::SetLogWriter,
        Self::Close,
    ];

    #[must_use]
    pub const fn support(self) -> Support {
        match self {
            Self::GetConnection => Support::Delegated,
            Self::GetLoginTimeout | Self::SetLoginTimeout => Support::Unsupported,
            Self::GetLogWriter | Self::SetLogWriter | Self::Close => Support::Supported,
        }
    }

    /// Fail if the operation is unsupported
    pub fn check(self) -> Result<()> {
        match self.support() {
            Support::Unsupported => Err(Error::not_supported(self.to_string())),
            Support::Delegated | Support::Supported => Ok(()),
        }
    }
}

/// A logical connection pinned to one snapshot.
///
/// The snapshot, and with it every pool it references, stays alive for as
/// long as the connection does, even if a renewal replaces it meanwhile.
pub struct Connection {
    metadata: Arc<MetadataContext>,
    disabled: Arc<DisabledState>,
}

impl Connection {
    pub fn metadata(&self) -> &Arc<MetadataContext> {
        &self.metadata
    }

    /// Data source a read against `group` is routed to
    pub fn route_read(&self, group: &str) -> Result<String> {
        contexts::route_read(&self.metadata, &self.disabled, group)
    }

    /// Data nodes a sharded logic table routes to for `values`
    pub fn route_table(&self, logic_table: &str, values: &BTreeMap<String, ShardingValue>) -> Result<Vec<DataNode>> {
        self.metadata
            .rules()
            .iter()
            .filter_map(|rule| rule.as_sharding())
            .find_map(|rule| rule.route(logic_table, values))
            .ok_or_else(|| Error::configuration(format!("logic table '{logic_table}' is not sharded")))
    }

    /// Check out a physical connection
    pub fn physical(&self, data_source: &str) -> Result<PhysicalConnection> {
        self.metadata.physical_connection(data_source)
    }
}

/// Facade over one schema.
///
/// [`close`](Self::close) drains pending renewals first. Dropping the facade
/// without closing it aborts its renewal tasks and discards queued changes.
pub struct ShardingDataSource {
    schema: String,
    contexts: Arc<MetadataContexts>,
    mode: Mode,
    log_writer: RwLock<Option<LogWriter>>,
    closed: AtomicBool,
}

impl ShardingDataSource {
    pub(crate) fn new(schema: impl Into<String>, contexts: Arc<MetadataContexts>, mode: Mode) -> Self {
        Self {
            schema: schema.into(),
            contexts,
            mode,
            log_writer: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub const fn mode_type(&self) -> ModeType {
        self.mode.mode_type()
    }

    /// Metadata contexts handle for the routing layer
    pub const fn contexts(&self) -> &Arc<MetadataContexts> {
        &self.contexts
    }

    /// Registry center in cluster mode
    pub const fn registry(&self) -> Option<&RegistryCenter> {
        self.mode.registry()
    }

    /// Currently published snapshot of this facade's schema
    pub fn metadata(&self) -> Result<Arc<MetadataContext>> {
        self.contexts
            .metadata(&self.schema)
            .ok_or_else(|| Error::SchemaNotFound(self.schema.clone()))
    }

    pub fn props(&self) -> Arc<ConfigurationProperties> {
        self.contexts.props()
    }

    /// Open a logical connection on the active snapshot
    pub fn connection(&self) -> Result<Connection> {
        AdminOperation::GetConnection.check()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(Connection {
            metadata: self.metadata()?,
            disabled: Arc::clone(self.contexts.disabled()),
        })
    }

    /// Always fails with `OperationNotSupported`
    pub fn login_timeout(&self) -> Result<Duration> {
        Err(Error::not_supported(AdminOperation::GetLoginTimeout.to_string()))
    }

    /// Always fails with `OperationNotSupported`
    pub fn set_login_timeout(&self, _timeout: Duration) -> Result<()> {
        Err(Error::not_supported(AdminOperation::SetLoginTimeout.to_string()))
    }

    pub fn log_writer(&self) -> Option<LogWriter> {
        self.log_writer.read().clone()
    }

    pub fn set_log_writer(&self, writer: Option<LogWriter>) {
        *self.log_writer.write() = writer;
    }

    fn log_line(&self, line: &str) {
        if let Some(writer) = self.log_writer() {
            if let Err(e) = writeln!(writer.lock(), "{line}") {
                warn!("Failed to write to log writer: {}", e);
            }
        }
    }

    /// Cancel subscriptions, drain in-flight renewals, close the registry
    /// and release the schema's pools
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Mode::Cluster { center, dispatcher } = &self.mode {
            dispatcher.shutdown().await;
            center.close().await?;
        }
        self.contexts.drop_schema(&self.schema).await?;
        self.log_line(&format!("schema {} closed", self.schema));
        info!("Sharding data source for schema {} closed", self.schema);
        Ok(())
    }
}

impl Drop for ShardingDataSource {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            warn!(
                "Sharding data source for schema {} dropped without close, renewal tasks aborted",
                self.schema
            );
        }
    }
}
