//! Error types for replica routing
//!
//! The routing layer adds no errors to the execution path; failures from the
//! wrapped executor reach the caller unchanged. [`RoutingError`] only covers
//! configuration and connection resolution, and converts into
//! `diesel::result::Error` so public async APIs can return Diesel's
//! `QueryResult`.

use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};

/// Configuration and resolution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// A replica was requested but none is configured
    #[error("replica target requested but no replica connection is configured")]
    ReplicaNotConfigured,
    /// A routing target name could not be parsed
    #[error("unknown routing target `{0}`")]
    UnknownTarget(String),
    /// An aggregate operation name could not be parsed
    #[error("unknown aggregate operation `{0}`")]
    UnknownAggregate(String),
    /// A required configuration value is absent
    #[error("missing configuration value `{0}`")]
    MissingConfig(String),
    /// A configuration value is present but malformed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<RoutingError> for diesel::result::Error {
    fn from(error: RoutingError) -> Self {
        diesel::result::Error::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new(RoutingErrorInfo::new(error.to_string())),
        )
    }
}

/// Error information handed to Diesel's error system
#[derive(Debug, Clone)]
pub struct RoutingErrorInfo {
    message: String,
}

impl RoutingErrorInfo {
    /// Create error information with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RoutingErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RoutingErrorInfo {}

impl DatabaseErrorInformation for RoutingErrorInfo {
    fn message(&self) -> &str {
        &self.message
    }

    fn details(&self) -> Option<&str> {
        None
    }

    fn hint(&self) -> Option<&str> {
        None
    }

    fn table_name(&self) -> Option<&str> {
        None
    }

    fn column_name(&self) -> Option<&str> {
        None
    }

    fn constraint_name(&self) -> Option<&str> {
        None
    }

    fn statement_position(&self) -> Option<i32> {
        None
    }
}
