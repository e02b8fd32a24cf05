//! Routing spans
//!
//! Every query passing through [`ReplicaRouting`](crate::ReplicaRouting)
//! produces one [`RoutingSpan`]: what was asked for, which target the query
//! actually ran against, how long it took, and how it failed if it did. Spans
//! are handed to a [`SpanEmitter`]; the default one forwards them to `tracing`.
//!
//! # Span Fields
//!
//! - `operation`: `"fetch"` or `"aggregate"`
//! - `requested`: the query's routing preference (`"default"` / `"replica"`)
//! - `resolved`: the routing target in effect while the query ran
//! - `aggregate`: the aggregate expression, e.g. `COUNT(id)` (aggregate only)
//! - `rows`: number of rows materialized (fetch only)
//!
//! # Example
//!
//! ```
//! use diesel_replica::instrumentation::{RoutingSpan, SpanOperation};
//! use diesel_replica::{QueryTarget, RoutingTarget};
//!
//! let mut span = RoutingSpan::new(SpanOperation::Fetch, QueryTarget::Replica);
//! span.record_success(RoutingTarget::Replica, Some(3), std::time::Duration::from_millis(4));
//!
//! assert!(span.summary().contains("resolved=replica"));
//! ```

use std::time::{Duration, Instant};

use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::aggregate::Aggregate;
use crate::target::{QueryTarget, RoutingTarget};

/// The execution path a span describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOperation {
    /// Materializing rows
    Fetch,
    /// Computing an aggregate over a column
    Aggregate,
}

impl SpanOperation {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanOperation::Fetch => "fetch",
            SpanOperation::Aggregate => "aggregate",
        }
    }
}

impl std::fmt::Display for SpanOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error classification for failed queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No row matched
    NotFound,
    /// Constraint violation reported by the database
    Constraint,
    /// Connection closed or unusable
    Connection,
    /// Transaction state error or serialization failure
    Transaction,
    /// The query could not be built
    QueryBuilder,
    /// A result value could not be decoded
    Decode,
    /// A bind value could not be encoded
    Encode,
    /// Any other database error
    Database,
    /// Unknown error
    Unknown,
}

impl ErrorClass {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Constraint => "constraint",
            ErrorClass::Connection => "connection",
            ErrorClass::Transaction => "transaction",
            ErrorClass::QueryBuilder => "query_builder",
            ErrorClass::Decode => "decode",
            ErrorClass::Encode => "encode",
            ErrorClass::Database => "database",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Classify a Diesel error
    pub fn from_diesel(error: &DieselError) -> Self {
        match error {
            DieselError::NotFound => ErrorClass::NotFound,
            DieselError::DatabaseError(kind, _) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => ErrorClass::Constraint,
                DatabaseErrorKind::ClosedConnection
                | DatabaseErrorKind::UnableToSendCommand => ErrorClass::Connection,
                DatabaseErrorKind::SerializationFailure
                | DatabaseErrorKind::ReadOnlyTransaction => ErrorClass::Transaction,
                _ => ErrorClass::Database,
            },
            DieselError::QueryBuilderError(_) => ErrorClass::QueryBuilder,
            DieselError::DeserializationError(_) => ErrorClass::Decode,
            DieselError::SerializationError(_) => ErrorClass::Encode,
            DieselError::RollbackTransaction
            | DieselError::AlreadyInTransaction
            | DieselError::NotInTransaction
            | DieselError::BrokenTransactionManager => ErrorClass::Transaction,
            _ => ErrorClass::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata for one routed query
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingSpan {
    /// The execution path
    pub operation: SpanOperation,
    /// The query's routing preference
    pub requested: QueryTarget,
    /// The target in effect while the query ran
    pub resolved: Option<RoutingTarget>,
    /// Aggregate operation (aggregate path only)
    pub aggregate: Option<Aggregate>,
    /// Aggregated column (aggregate path only)
    pub column: Option<String>,
    /// Number of rows materialized
    pub rows: Option<usize>,
    /// Execution duration
    pub duration: Option<Duration>,
    /// Error class (if failed)
    pub error_class: Option<ErrorClass>,
    /// Error message (if failed)
    pub error_message: Option<String>,
}

impl RoutingSpan {
    /// Create a new span for an operation
    pub fn new(operation: SpanOperation, requested: QueryTarget) -> Self {
        Self {
            operation,
            requested,
            resolved: None,
            aggregate: None,
            column: None,
            rows: None,
            duration: None,
            error_class: None,
            error_message: None,
        }
    }

    /// Set the aggregate operation and column
    pub fn with_aggregate(mut self, aggregate: Aggregate, column: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate);
        self.column = Some(column.into());
        self
    }

    /// Record a successful execution
    pub fn record_success(
        &mut self,
        resolved: RoutingTarget,
        rows: Option<usize>,
        duration: Duration,
    ) {
        self.resolved = Some(resolved);
        self.rows = rows;
        self.duration = Some(duration);
    }

    /// Record a failed execution
    pub fn record_error(&mut self, resolved: RoutingTarget, error: &DieselError, duration: Duration) {
        self.resolved = Some(resolved);
        self.duration = Some(duration);
        self.error_class = Some(ErrorClass::from_diesel(error));
        self.error_message = Some(error.to_string());
    }

    /// The aggregate as a SQL expression, e.g. `SUM(amount)`
    pub fn aggregate_expression(&self) -> Option<String> {
        match (self.aggregate, self.column.as_deref()) {
            (Some(aggregate), Some(column)) => Some(aggregate.expression(column)),
            _ => None,
        }
    }

    /// Check if the span represents a failure
    pub fn is_error(&self) -> bool {
        self.error_class.is_some()
    }

    /// Get a summary string for the span
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("op={}", self.operation),
            format!("requested={}", self.requested),
        ];

        if let Some(resolved) = self.resolved {
            parts.push(format!("resolved={}", resolved));
        }

        if let Some(expression) = self.aggregate_expression() {
            parts.push(format!("aggregate={}", expression));
        }

        if let Some(rows) = self.rows {
            parts.push(format!("rows={}", rows));
        }

        if let Some(ref duration) = self.duration {
            parts.push(format!("duration={:?}", duration));
        }

        if let Some(ref error) = self.error_class {
            parts.push(format!("error={}", error));
        }

        parts.join(" ")
    }
}

/// Trait for types that can emit spans
pub trait SpanEmitter: Send + Sync {
    /// Emit a routing span
    fn emit_span(&self, span: &RoutingSpan);
}

/// A no-op span emitter
#[derive(Debug, Clone, Default)]
pub struct NoopSpanEmitter;

impl SpanEmitter for NoopSpanEmitter {
    fn emit_span(&self, _span: &RoutingSpan) {}
}

/// Forwards spans to `tracing` as events
///
/// Successful queries are logged at `debug`, failures at `warn`.
#[derive(Debug, Clone, Default)]
pub struct TracingSpanEmitter;

impl SpanEmitter for TracingSpanEmitter {
    fn emit_span(&self, span: &RoutingSpan) {
        let resolved = span.resolved.map(|t| t.as_str()).unwrap_or("unknown");
        let duration_ms = span.duration.map(|d| d.as_secs_f64() * 1000.0);
        let aggregate = span.aggregate_expression();

        match (&span.error_class, &span.error_message) {
            (Some(class), message) => tracing::warn!(
                operation = %span.operation,
                requested = %span.requested,
                resolved,
                aggregate = aggregate.as_deref(),
                duration_ms,
                error_class = %class,
                error = message.as_deref().unwrap_or(""),
                "routed query failed"
            ),
            (None, _) => tracing::debug!(
                operation = %span.operation,
                requested = %span.requested,
                resolved,
                aggregate = aggregate.as_deref(),
                rows = span.rows,
                duration_ms,
                "routed query finished"
            ),
        }
    }
}

/// Captures spans in memory
#[derive(Debug, Default)]
pub struct RecordingSpanEmitter {
    spans: std::sync::Mutex<Vec<RoutingSpan>>,
}

impl RecordingSpanEmitter {
    /// Create a new recording emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured spans
    pub fn get_spans(&self) -> Vec<RoutingSpan> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Clear all captured spans
    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }

    /// Get the number of captured spans
    pub fn len(&self) -> usize {
        self.spans.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Check if no spans have been captured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpanEmitter for RecordingSpanEmitter {
    fn emit_span(&self, span: &RoutingSpan) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span.clone());
        }
    }
}

/// Helper to time a routed query and create its span
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    span: RoutingSpan,
}

impl SpanTimer {
    /// Start timing an operation
    pub fn start(operation: SpanOperation, requested: QueryTarget) -> Self {
        Self::start_span(RoutingSpan::new(operation, requested))
    }

    /// Start timing with a prepared span
    pub fn start_span(span: RoutingSpan) -> Self {
        Self {
            start: Instant::now(),
            span,
        }
    }

    /// Finish timing and record success
    pub fn finish_success(mut self, resolved: RoutingTarget, rows: Option<usize>) -> RoutingSpan {
        let duration = self.start.elapsed();
        self.span.record_success(resolved, rows, duration);
        self.span
    }

    /// Finish timing and record an error
    pub fn finish_error(mut self, resolved: RoutingTarget, error: &DieselError) -> RoutingSpan {
        let duration = self.start.elapsed();
        self.span.record_error(resolved, error, duration);
        self.span
    }

    /// Get the elapsed duration so far
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
