//! # Diesel Replica
//!
//! Per-query read replica routing for Diesel async connections.
//!
//! A query can be tagged to run on a read replica instead of the master. The
//! tag is honoured only for that query's execution: the replica target is
//! pushed onto a task-scoped routing context for the duration of the call and
//! restored afterwards, so queries issued later go back to the master.
//!
//! ## Pieces
//!
//! - [`context`] - the routing context and its scoped-acquisition helpers
//! - [`RoutedQuery`] / [`RoutingDsl`] - the `on_replica()` annotation
//! - [`ReplicaRouting`] - decorates a [`QueryExecutor`] with the routing decision
//! - [`ConnectionResolver`] / [`ConnectionSet`] - picks the connection for a target
//! - [`RoutingConfig`] - master/replica URLs and the routing kill switch
//!
//! ## Features
//!
//! - `serde` - `Serialize`/`Deserialize` for configuration and targets, and
//!   [`RoutingConfig::from_json`]
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! diesel-replica = "0.1"
//! ```
//!
//! ```no_run
//! use diesel::QueryDsl;
//! # use diesel::sqlite::SqliteConnection;
//! # use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
//! # diesel::table! {
//! #     users (id) {
//! #         id -> Integer,
//! #         name -> Text,
//! #     }
//! # }
//! use diesel_replica::{ConnectionSet, RoutingConfig, RoutingDsl};
//! # type AsyncSqliteConnection = SyncConnectionWrapper<SqliteConnection>;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RoutingConfig::from_env()?;
//! let connections = ConnectionSet::<AsyncSqliteConnection>::establish(&config).await?;
//!
//! // Read from a replica
//! let names: Vec<String> = users::table
//!     .select(users::name)
//!     .on_replica()
//!     .load_on(&connections)
//!     .await?;
//!
//! // Back on the master
//! let total: i64 = users::table
//!     .count()
//!     .routed()
//!     .get_result_on(&connections)
//!     .await?;
//! # Ok(())
//! # }
//! # fn main() {}
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
mod error;
pub mod executor;
pub mod instrumentation;
mod query;
pub mod resolver;
mod target;

// Re-exports
pub use aggregate::Aggregate;
pub use config::{RoutingConfig, RoutingConfigBuilder};
pub use context::{current_target, with_target, TargetScope, WithTargetExt};
pub use error::{RoutingError, RoutingErrorInfo};
pub use executor::{QueryExecutor, ReplicaRouting};
pub use query::{RoutedQuery, RoutingDsl};
pub use resolver::{ConnectionResolver, ConnectionSet};
pub use target::{QueryTarget, RoutingTarget};
