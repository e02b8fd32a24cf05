//! Routing annotations on queries
//!
//! A [`RoutedQuery`] is a query that has not run yet, plus the caller's
//! routing preference. The preference only takes effect when the query is
//! executed, and only for that execution: it never leaks into the routing
//! context of queries issued afterwards.
//!
//! # Example
//!
//! ```
//! use diesel_replica::{QueryTarget, RoutingDsl};
//!
//! let query = "SELECT * FROM users".on_replica();
//! assert_eq!(query.target(), QueryTarget::Replica);
//!
//! let plain = query.clone().on_default();
//! assert_eq!(plain.target(), QueryTarget::Default);
//! ```

use std::ops::DerefMut;

use diesel::QueryResult;
use diesel_async::methods::LoadQuery;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::context::TargetScope;
use crate::resolver::ConnectionResolver;
use crate::target::{QueryTarget, RoutingTarget};

/// A query together with its routing preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutedQuery<Q> {
    query: Q,
    target: QueryTarget,
}

impl<Q> RoutedQuery<Q> {
    /// Wrap a query without a routing preference
    pub fn new(query: Q) -> Self {
        Self {
            query,
            target: QueryTarget::Default,
        }
    }

    /// Route this query to a replica
    pub fn on_replica(mut self) -> Self {
        self.target = QueryTarget::Replica;
        self
    }

    /// Clear the routing preference
    pub fn on_default(mut self) -> Self {
        self.target = QueryTarget::Default;
        self
    }

    /// Set the routing preference
    pub fn routed_to(mut self, target: QueryTarget) -> Self {
        self.target = target;
        self
    }

    /// Get the routing preference
    pub fn target(&self) -> QueryTarget {
        self.target
    }

    /// Check if this query is routed to a replica
    pub fn is_replica(&self) -> bool {
        self.target == QueryTarget::Replica
    }

    /// Get the wrapped query
    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Get the wrapped query mutably
    pub fn query_mut(&mut self) -> &mut Q {
        &mut self.query
    }

    /// Unwrap the query, dropping the routing preference
    pub fn into_inner(self) -> Q {
        self.query
    }

    /// Split into the query and its routing preference
    pub fn into_parts(self) -> (Q, QueryTarget) {
        (self.query, self.target)
    }

    /// Build a further query, keeping the routing preference
    pub fn map<F, T>(self, f: F) -> RoutedQuery<T>
    where
        F: FnOnce(Q) -> T,
    {
        RoutedQuery {
            query: f(self.query),
            target: self.target,
        }
    }

    /// Run `future` in the routing scope this query asks for
    ///
    /// Untagged queries get a pass-through scope that leaves the routing
    /// context alone.
    pub fn scope<F>(&self, future: F) -> TargetScope<F> {
        TargetScope::optional(self.target.routing_target(), future)
    }

    fn scope_target<R: ConnectionResolver>(&self, resolver: &R) -> Option<RoutingTarget> {
        if resolver.routing_disabled() {
            None
        } else {
            self.target.routing_target()
        }
    }

    /// Load all rows of a Diesel query on the connection for its target
    ///
    /// A replica-tagged query runs inside a replica scope unless the resolver
    /// has replica routing switched off.
    ///
    /// ```no_run
    /// use diesel::QueryDsl;
    /// use diesel_replica::RoutingDsl;
    /// # use diesel::sqlite::SqliteConnection;
    /// # use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
    /// # use diesel_replica::ConnectionSet;
    /// # diesel::table! {
    /// #     users (id) {
    /// #         id -> Integer,
    /// #         name -> Text,
    /// #     }
    /// # }
    /// # async fn run(
    /// #     connections: ConnectionSet<SyncConnectionWrapper<SqliteConnection>>,
    /// # ) -> diesel::QueryResult<()> {
    /// let names: Vec<String> = users::table
    ///     .select(users::name)
    ///     .on_replica()
    ///     .load_on(&connections)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// # fn main() {}
    /// ```
    pub async fn load_on<'query, R, C, U>(self, resolver: &R) -> QueryResult<Vec<U>>
    where
        R: ConnectionResolver,
        R::Connection: DerefMut<Target = C>,
        C: AsyncConnection,
        U: Send,
        Q: LoadQuery<'query, C, U> + 'query,
    {
        let target = self.scope_target(resolver);
        let query = self.into_inner();
        TargetScope::optional(target, async move {
            let mut conn = resolver.resolve_current().await?;
            RunQueryDsl::load(query, &mut *conn).await
        })
        .await
    }

    /// Load a single value (typically an aggregate) on the connection for its target
    ///
    /// ```no_run
    /// use diesel::dsl::count_star;
    /// use diesel::QueryDsl;
    /// use diesel_replica::RoutingDsl;
    /// # use diesel::sqlite::SqliteConnection;
    /// # use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
    /// # use diesel_replica::ConnectionSet;
    /// # diesel::table! {
    /// #     users (id) {
    /// #         id -> Integer,
    /// #         name -> Text,
    /// #     }
    /// # }
    /// # async fn run(
    /// #     connections: ConnectionSet<SyncConnectionWrapper<SqliteConnection>>,
    /// # ) -> diesel::QueryResult<()> {
    /// let total: i64 = users::table
    ///     .select(count_star())
    ///     .on_replica()
    ///     .get_result_on(&connections)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// # fn main() {}
    /// ```
    pub async fn get_result_on<'query, R, C, U>(self, resolver: &R) -> QueryResult<U>
    where
        R: ConnectionResolver,
        R::Connection: DerefMut<Target = C>,
        C: AsyncConnection,
        U: Send + 'static,
        Q: LoadQuery<'query, C, U> + 'query,
    {
        let target = self.scope_target(resolver);
        let query = self.into_inner();
        TargetScope::optional(target, async move {
            let mut conn = resolver.resolve_current().await?;
            RunQueryDsl::get_result(query, &mut *conn).await
        })
        .await
    }
}

impl<Q> From<Q> for RoutedQuery<Q> {
    fn from(query: Q) -> Self {
        Self::new(query)
    }
}

/// Fluent routing annotations for any query value
pub trait RoutingDsl: Sized {
    /// Wrap this query without a routing preference
    fn routed(self) -> RoutedQuery<Self> {
        RoutedQuery::new(self)
    }

    /// Wrap this query and route it to a replica
    fn on_replica(self) -> RoutedQuery<Self> {
        RoutedQuery::new(self).on_replica()
    }
}

impl<T> RoutingDsl for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::current_target;

    #[derive(Debug, Clone, PartialEq)]
    struct UserQuery {
        filter: Option<&'static str>,
        limit: Option<usize>,
    }

    fn users() -> UserQuery {
        UserQuery {
            filter: None,
            limit: None,
        }
    }

    #[test]
    fn test_new_has_default_target() {
        let query = RoutedQuery::new(users());
        assert_eq!(query.target(), QueryTarget::Default);
        assert!(!query.is_replica());

        let query: RoutedQuery<UserQuery> = users().into();
        assert_eq!(query.target(), QueryTarget::Default);
    }

    #[test]
    fn test_on_replica_and_back() {
        let query = users().on_replica();
        assert!(query.is_replica());

        let query = query.on_default();
        assert_eq!(query.target(), QueryTarget::Default);

        let query = query.routed_to(QueryTarget::Replica);
        assert!(query.is_replica());
    }

    #[test]
    fn test_on_replica_on_routed_query_does_not_nest() {
        let query: RoutedQuery<UserQuery> = users().routed().on_replica();
        assert!(query.is_replica());
        assert_eq!(query.query(), &users());
    }

    #[test]
    fn test_map_keeps_target() {
        let query = users()
            .on_replica()
            .map(|q| UserQuery {
                filter: Some("active"),
                ..q
            })
            .map(|q| UserQuery {
                limit: Some(10),
                ..q
            });

        assert!(query.is_replica());
        assert_eq!(query.query().filter, Some("active"));
        assert_eq!(query.query().limit, Some(10));
    }

    #[test]
    fn test_query_mut_and_parts() {
        let mut query = users().on_replica();
        query.query_mut().limit = Some(5);

        let (inner, target) = query.clone().into_parts();
        assert_eq!(inner.limit, Some(5));
        assert_eq!(target, QueryTarget::Replica);
        assert_eq!(query.into_inner().limit, Some(5));
    }

    #[tokio::test]
    async fn test_scope_follows_target() {
        let replica = users().on_replica();
        let seen = replica.scope(async { current_target() }).await;
        assert_eq!(seen, RoutingTarget::Replica);

        let plain = users().routed();
        assert_eq!(plain.scope(async {}).target(), None);
        let seen = plain.scope(async { current_target() }).await;
        assert_eq!(seen, RoutingTarget::Master);

        assert_eq!(current_target(), RoutingTarget::Master);
    }

    mod sqlite {
        use super::*;
        use crate::context::{scope_depth, WithTargetExt};
        use crate::resolver::ConnectionSet;
        use diesel::sqlite::SqliteConnection;
        use diesel::{ExpressionMethods, QueryDsl};
        use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
        use std::sync::Mutex;
        use tokio::sync::OwnedMutexGuard;

        diesel::table! {
            users (id) {
                id -> Integer,
                name -> Text,
            }
        }

        type TestConnection = SyncConnectionWrapper<SqliteConnection>;

        async fn database(names: &[&str]) -> TestConnection {
            let mut conn = TestConnection::establish(":memory:").await.unwrap();
            diesel::sql_query(
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
            )
            .execute(&mut conn)
            .await
            .unwrap();

            for name in names {
                diesel::insert_into(users::table)
                    .values(users::name.eq(*name))
                    .execute(&mut conn)
                    .await
                    .unwrap();
            }
            conn
        }

        async fn master_and_replica() -> ConnectionSet<TestConnection> {
            ConnectionSet::new(database(&["alice", "bob", "carol"]).await)
                .with_replica(database(&["dave"]).await)
        }

        async fn load_names<R>(query: RoutedQuery<()>, resolver: &R) -> Vec<String>
        where
            R: ConnectionResolver<Connection = OwnedMutexGuard<TestConnection>>,
        {
            query
                .map(|()| users::table.select(users::name).order(users::id))
                .load_on(resolver)
                .await
                .unwrap()
        }

        #[tokio::test]
        async fn test_tagged_queries_read_replica_then_master() {
            let set = master_and_replica().await;

            let names: Vec<String> = users::table
                .select(users::name)
                .on_replica()
                .load_on(&set)
                .await
                .unwrap();
            assert_eq!(names, vec!["dave"]);
            assert_eq!(current_target(), RoutingTarget::Master);

            let total: i64 = users::table
                .count()
                .on_replica()
                .get_result_on(&set)
                .await
                .unwrap();
            assert_eq!(total, 1);

            let names: Vec<String> = users::table
                .select(users::name)
                .order(users::id)
                .routed()
                .load_on(&set)
                .await
                .unwrap();
            assert_eq!(names, vec!["alice", "bob", "carol"]);

            let total: i64 = users::table
                .count()
                .routed()
                .get_result_on(&set)
                .await
                .unwrap();
            assert_eq!(total, 3);

            assert_eq!(current_target(), RoutingTarget::Master);
            assert_eq!(scope_depth(), 0);
        }

        #[tokio::test]
        async fn test_untagged_load_on_follows_enclosing_scope() {
            let set = master_and_replica().await;

            let names = load_names(().routed(), &set)
                .with_target(RoutingTarget::Replica)
                .await;
            assert_eq!(names, vec!["dave"]);

            let names = load_names(().routed(), &set).await;
            assert_eq!(names, vec!["alice", "bob", "carol"]);
        }

        #[tokio::test]
        async fn test_missing_replica_fails_and_restores() {
            let set = ConnectionSet::new(database(&["alice"]).await);

            let result: QueryResult<i64> = users::table
                .count()
                .on_replica()
                .get_result_on(&set)
                .await;
            let err = result.unwrap_err();
            assert!(err.to_string().contains("no replica connection is configured"));
            assert_eq!(current_target(), RoutingTarget::Master);

            let total: i64 = users::table
                .count()
                .routed()
                .get_result_on(&set)
                .await
                .unwrap();
            assert_eq!(total, 1);
        }

        #[tokio::test]
        async fn test_disabled_set_reads_master() {
            let set = master_and_replica().await.with_disabled(true);

            let names = load_names(().on_replica(), &set).await;
            assert_eq!(names, vec!["alice", "bob", "carol"]);
        }

        struct SwitchedOff {
            connections: ConnectionSet<TestConnection>,
            seen: Mutex<Vec<RoutingTarget>>,
        }

        #[async_trait::async_trait]
        impl ConnectionResolver for SwitchedOff {
            type Connection = OwnedMutexGuard<TestConnection>;

            async fn resolve(&self, target: RoutingTarget) -> QueryResult<Self::Connection> {
                self.seen.lock().unwrap().push(target);
                self.connections.resolve(target).await
            }

            fn routing_disabled(&self) -> bool {
                true
            }
        }

        #[tokio::test]
        async fn test_resolver_kill_switch_skips_replica_scope() {
            let resolver = SwitchedOff {
                connections: master_and_replica().await,
                seen: Mutex::new(Vec::new()),
            };

            let names = load_names(().on_replica(), &resolver).await;
            assert_eq!(names, vec!["alice", "bob", "carol"]);

            let total: i64 = users::table
                .count()
                .on_replica()
                .get_result_on(&resolver)
                .await
                .unwrap();
            assert_eq!(total, 3);

            assert_eq!(
                *resolver.seen.lock().unwrap(),
                vec![RoutingTarget::Master, RoutingTarget::Master]
            );
        }
    }
}
