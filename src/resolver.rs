//! Connection resolution
//!
//! Execution code never picks a connection itself. It asks a
//! [`ConnectionResolver`] for the connection belonging to the current routing
//! target, and the routing context decides which one that is.
//!
//! [`ConnectionSet`] is the stock resolver: one master and any number of
//! replicas, each an exclusively borrowed Diesel async connection.
//!
//! ```no_run
//! # use diesel::sqlite::SqliteConnection;
//! # use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
//! use diesel_replica::{ConnectionResolver, ConnectionSet, RoutingConfig};
//! # type AsyncSqliteConnection = SyncConnectionWrapper<SqliteConnection>;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RoutingConfig::from_env()?;
//! let connections = ConnectionSet::<AsyncSqliteConnection>::establish(&config).await?;
//!
//! // Master, unless called inside a replica scope
//! let conn = connections.resolve_current().await?;
//! # Ok(())
//! # }
//! # fn main() {}
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use diesel::{ConnectionError, ConnectionResult, QueryResult};
use diesel_async::AsyncConnection;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::RoutingConfig;
use crate::context::current_target;
use crate::error::RoutingError;
use crate::target::RoutingTarget;

/// Hands out a connection for a routing target
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// The connection handle returned to the caller
    type Connection: Send;

    /// Get a connection for `target`
    async fn resolve(&self, target: RoutingTarget) -> QueryResult<Self::Connection>;

    /// Get a connection for the target of the current routing scope
    async fn resolve_current(&self) -> QueryResult<Self::Connection> {
        let target = current_target();
        self.resolve(target).await
    }

    /// Check if replica routing is switched off for this resolver
    ///
    /// Replica-tagged queries run through a disabled resolver do not open a
    /// replica scope at all.
    fn routing_disabled(&self) -> bool {
        false
    }
}

#[async_trait]
impl<R> ConnectionResolver for Arc<R>
where
    R: ConnectionResolver,
{
    type Connection = R::Connection;

    async fn resolve(&self, target: RoutingTarget) -> QueryResult<Self::Connection> {
        (**self).resolve(target).await
    }

    fn routing_disabled(&self) -> bool {
        (**self).routing_disabled()
    }
}

/// A master connection plus zero or more replica connections
///
/// Replicas are handed out round-robin. Each connection is held by at most
/// one caller at a time; the returned guard releases it on drop.
pub struct ConnectionSet<C> {
    master: Arc<Mutex<C>>,
    replicas: Vec<Arc<Mutex<C>>>,
    next_replica: AtomicUsize,
    disabled: bool,
}

impl<C> ConnectionSet<C> {
    /// Create a set with only a master connection
    pub fn new(master: C) -> Self {
        Self {
            master: Arc::new(Mutex::new(master)),
            replicas: Vec::new(),
            next_replica: AtomicUsize::new(0),
            disabled: false,
        }
    }

    /// Add a replica connection
    pub fn with_replica(mut self, replica: C) -> Self {
        self.replicas.push(Arc::new(Mutex::new(replica)));
        self
    }

    /// Resolve replica requests to the master instead
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Get the number of replica connections
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Check if replica requests are redirected to the master
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn select_replica(&self) -> Option<&Arc<Mutex<C>>> {
        if self.replicas.is_empty() {
            return None;
        }
        let index = self.next_replica.fetch_add(1, Ordering::Relaxed);
        Some(&self.replicas[index % self.replicas.len()])
    }
}

impl<C> ConnectionSet<C>
where
    C: AsyncConnection + 'static,
{
    /// Open every connection named by `config`
    pub async fn establish(config: &RoutingConfig) -> ConnectionResult<Self> {
        config
            .validate()
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

        let master = C::establish(config.master_url()).await?;
        let mut set = Self::new(master).with_disabled(config.disabled());

        for url in config.replica_urls() {
            set = set.with_replica(C::establish(url).await?);
        }

        tracing::debug!(
            replicas = set.replica_count(),
            disabled = set.disabled,
            "established connection set"
        );
        Ok(set)
    }
}

#[async_trait]
impl<C> ConnectionResolver for ConnectionSet<C>
where
    C: Send + 'static,
{
    type Connection = OwnedMutexGuard<C>;

    async fn resolve(&self, target: RoutingTarget) -> QueryResult<Self::Connection> {
        let slot = match target {
            RoutingTarget::Master => &self.master,
            RoutingTarget::Replica if self.disabled => &self.master,
            RoutingTarget::Replica => self
                .select_replica()
                .ok_or(RoutingError::ReplicaNotConfigured)?,
        };

        Ok(Arc::clone(slot).lock_owned().await)
    }

    fn routing_disabled(&self) -> bool {
        self.disabled
    }
}
