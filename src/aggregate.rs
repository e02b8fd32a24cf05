//! Aggregate operations
//!
//! The aggregate path computes a single value over one column. The operation
//! is usually named by the caller (`"count"`, `"sum"`), so it parses from a
//! string as well as being constructed directly.

use std::str::FromStr;

use crate::error::RoutingError;

/// A calculation over a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Aggregate {
    /// Number of rows
    Count,
    /// Sum of the column
    Sum,
    /// Mean of the column
    Average,
    /// Smallest value of the column
    Minimum,
    /// Largest value of the column
    Maximum,
}

impl Aggregate {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Average => "average",
            Aggregate::Minimum => "minimum",
            Aggregate::Maximum => "maximum",
        }
    }

    /// The SQL function computing this aggregate
    pub fn sql_function(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Average => "AVG",
            Aggregate::Minimum => "MIN",
            Aggregate::Maximum => "MAX",
        }
    }

    /// Render this aggregate over `column`, e.g. `COUNT(id)`
    pub fn expression(&self, column: &str) -> String {
        format!("{}({})", self.sql_function(), column)
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            "average" | "avg" => Ok(Aggregate::Average),
            "minimum" | "min" => Ok(Aggregate::Minimum),
            "maximum" | "max" => Ok(Aggregate::Maximum),
            _ => Err(RoutingError::UnknownAggregate(s.to_string())),
        }
    }
}
