//! Statement shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a single SQL statement as seen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    /// A `WITH` block whose terminal statement is a `SELECT`.
    Cte,
    Unknown,
}

impl StatementKind {
    /// Whether the engine knows where to put a filtering clause.
    pub fn is_scopable(&self) -> bool {
        !matches!(self, StatementKind::Unknown)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Select => write!(f, "SELECT"),
            StatementKind::Update => write!(f, "UPDATE"),
            StatementKind::Delete => write!(f, "DELETE"),
            StatementKind::Cte => write!(f, "CTE"),
            StatementKind::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
