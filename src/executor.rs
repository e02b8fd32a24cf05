//! Query execution with replica routing
//!
//! A [`QueryExecutor`] is whatever actually runs a query: it compiles it,
//! resolves a connection through the routing context, and returns rows or an
//! aggregate value. [`ReplicaRouting`] decorates any executor with the routing
//! decision. For a query tagged [`QueryTarget::Replica`] it runs the delegated
//! call inside a replica scope; for an untagged query it calls straight
//! through without touching the routing context.
//!
//! The wrapper never alters results or errors. Its only effect is the routing
//! scope, which lasts exactly as long as the delegated call (including when
//! that call fails or is cancelled).
//!
//! # Example
//!
//! ```no_run
//! # use async_trait::async_trait;
//! # use diesel::QueryResult;
//! use diesel_replica::{Aggregate, QueryExecutor, ReplicaRouting, RoutingDsl};
//! # struct UserQuery;
//! # struct UserExecutor;
//! # #[async_trait]
//! # impl QueryExecutor<UserQuery> for UserExecutor {
//! #     type Row = String;
//! #     type Value = i64;
//! #     async fn fetch(&self, _: &UserQuery) -> QueryResult<Vec<String>> {
//! #         Ok(Vec::new())
//! #     }
//! #     async fn aggregate(&self, _: &UserQuery, _: Aggregate, _: &str) -> QueryResult<i64> {
//! #         Ok(0)
//! #     }
//! # }
//! # async fn run(my_executor: UserExecutor) -> QueryResult<()> {
//! let executor = ReplicaRouting::new(my_executor);
//!
//! // Runs against a replica
//! let total: i64 = executor
//!     .execute_aggregate(&UserQuery.on_replica(), "count", "id")
//!     .await?;
//!
//! // Runs against the master again
//! let names: Vec<String> = executor.execute_fetch(&UserQuery.routed()).await?;
//! # Ok(())
//! # }
//! # fn main() {}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use diesel::QueryResult;

use crate::aggregate::Aggregate;
use crate::config::RoutingConfig;
use crate::context::{current_target, TargetScope};
use crate::instrumentation::{
    RoutingSpan, SpanEmitter, SpanOperation, SpanTimer, TracingSpanEmitter,
};
use crate::query::RoutedQuery;
use crate::target::{QueryTarget, RoutingTarget};

/// The two ways a query builder triggers SQL execution
#[async_trait]
pub trait QueryExecutor<Q>: Send + Sync
where
    Q: Send + Sync,
{
    /// A materialized row
    type Row: Send;
    /// The result of an aggregate
    type Value: Send;

    /// Materialize the rows of `query`
    async fn fetch(&self, query: &Q) -> QueryResult<Vec<Self::Row>>;

    /// Compute `operation` over `column` for the rows of `query`
    async fn aggregate(
        &self,
        query: &Q,
        operation: Aggregate,
        column: &str,
    ) -> QueryResult<Self::Value>;
}

#[async_trait]
impl<Q, E> QueryExecutor<Q> for Arc<E>
where
    Q: Send + Sync,
    E: QueryExecutor<Q>,
{
    type Row = E::Row;
    type Value = E::Value;

    async fn fetch(&self, query: &Q) -> QueryResult<Vec<Self::Row>> {
        (**self).fetch(query).await
    }

    async fn aggregate(
        &self,
        query: &Q,
        operation: Aggregate,
        column: &str,
    ) -> QueryResult<Self::Value> {
        (**self).aggregate(query, operation, column).await
    }
}

/// Decorates an executor with per-query replica routing
pub struct ReplicaRouting<E> {
    inner: E,
    disabled: bool,
    emitter: Arc<dyn SpanEmitter>,
}

impl<E> ReplicaRouting<E> {
    /// Wrap `inner`, logging spans through `tracing`
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            disabled: false,
            emitter: Arc::new(TracingSpanEmitter),
        }
    }

    /// Wrap `inner`, taking the kill switch from `config`
    pub fn from_config(inner: E, config: &RoutingConfig) -> Self {
        Self::new(inner).with_disabled(config.disabled())
    }

    /// Ignore replica tags and leave the routing context alone
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Send spans to `emitter`
    pub fn with_emitter(mut self, emitter: Arc<dyn SpanEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Check if replica routing is switched off
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Get the wrapped executor
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Unwrap the executor
    pub fn into_inner(self) -> E {
        self.inner
    }

    /// The target to push for a query, if any
    fn scope_target(&self, requested: QueryTarget) -> Option<RoutingTarget> {
        if self.disabled {
            None
        } else {
            requested.routing_target()
        }
    }

    /// Materialize the rows of a routed query
    pub async fn execute_fetch<Q>(&self, query: &RoutedQuery<Q>) -> QueryResult<Vec<E::Row>>
    where
        Q: Send + Sync,
        E: QueryExecutor<Q>,
    {
        self.fetch(query).await
    }

    /// Compute an aggregate named by `operation` (`"count"`, `"sum"`, ...)
    ///
    /// An unknown operation name fails before anything is executed.
    pub async fn execute_aggregate<Q>(
        &self,
        query: &RoutedQuery<Q>,
        operation: &str,
        column: &str,
    ) -> QueryResult<E::Value>
    where
        Q: Send + Sync,
        E: QueryExecutor<Q>,
    {
        let operation: Aggregate = operation.parse()?;
        self.aggregate(query, operation, column).await
    }
}

impl<E> std::fmt::Debug for ReplicaRouting<E>
where
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaRouting")
            .field("inner", &self.inner)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<Q, E> QueryExecutor<RoutedQuery<Q>> for ReplicaRouting<E>
where
    Q: Send + Sync,
    E: QueryExecutor<Q>,
{
    type Row = E::Row;
    type Value = E::Value;

    async fn fetch(&self, query: &RoutedQuery<Q>) -> QueryResult<Vec<Self::Row>> {
        let pushed = self.scope_target(query.target());
        let resolved = pushed.unwrap_or_else(current_target);
        tracing::debug!(
            operation = "fetch",
            requested = %query.target(),
            resolved = %resolved,
            "routing query"
        );

        let timer = SpanTimer::start(SpanOperation::Fetch, query.target());
        let result = TargetScope::optional(pushed, self.inner.fetch(query.query())).await;

        let span = match &result {
            Ok(rows) => timer.finish_success(resolved, Some(rows.len())),
            Err(e) => timer.finish_error(resolved, e),
        };
        self.emitter.emit_span(&span);

        result
    }

    async fn aggregate(
        &self,
        query: &RoutedQuery<Q>,
        operation: Aggregate,
        column: &str,
    ) -> QueryResult<Self::Value> {
        let pushed = self.scope_target(query.target());
        let resolved = pushed.unwrap_or_else(current_target);
        tracing::debug!(
            operation = "aggregate",
            aggregate = %operation,
            column,
            requested = %query.target(),
            resolved = %resolved,
            "routing query"
        );

        let timer = SpanTimer::start_span(
            RoutingSpan::new(SpanOperation::Aggregate, query.target())
                .with_aggregate(operation, column),
        );

        let result = TargetScope::optional(
            pushed,
            self.inner.aggregate(query.query(), operation, column),
        )
        .await;

        let span = match &result {
            Ok(_) => timer.finish_success(resolved, None),
            Err(e) => timer.finish_error(resolved, e),
        };
        self.emitter.emit_span(&span);

        result
    }
}
