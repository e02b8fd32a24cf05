//! Routing targets
//!
//! Two small enums drive the whole crate: [`RoutingTarget`] names the physical
//! connection a statement runs against, and [`QueryTarget`] is the preference a
//! caller attaches to a query before executing it.

use std::str::FromStr;

use crate::error::RoutingError;

/// The connection a statement is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RoutingTarget {
    /// The primary, writable database
    #[default]
    Master,
    /// A read-only copy of the master
    Replica,
}

impl RoutingTarget {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingTarget::Master => "master",
            RoutingTarget::Replica => "replica",
        }
    }

    /// Check if this is the replica target
    pub fn is_replica(&self) -> bool {
        matches!(self, RoutingTarget::Replica)
    }
}

impl std::fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RoutingTarget {
    type Err = RoutingError;

    /// Accepts `master`/`primary` and `replica`/`slave`, ignoring case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" | "primary" => Ok(RoutingTarget::Master),
            "replica" | "slave" => Ok(RoutingTarget::Replica),
            _ => Err(RoutingError::UnknownTarget(s.to_string())),
        }
    }
}

/// Routing preference carried by a query builder
///
/// `Default` means "use whatever target is current"; it never changes the
/// routing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum QueryTarget {
    /// No preference
    #[default]
    Default,
    /// Run on a replica
    Replica,
}

impl QueryTarget {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryTarget::Default => "default",
            QueryTarget::Replica => "replica",
        }
    }

    /// The target this preference pushes onto the routing context, if any
    pub fn routing_target(&self) -> Option<RoutingTarget> {
        match self {
            QueryTarget::Default => None,
            QueryTarget::Replica => Some(RoutingTarget::Replica),
        }
    }
}

impl std::fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
