//! Enforcement mode flags.

use serde::{Deserialize, Serialize};

/// Flags steering the policy decision for each statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementModes {
    /// Resolver failures reject the statement instead of skipping the rule.
    #[serde(default)]
    pub strict_mode: bool,

    /// Statements the classifier cannot place are rejected.
    #[serde(default)]
    pub reject_unknown_shapes: bool,

    /// Every discovered table must have a rule.
    #[serde(default)]
    pub strict_all_tables: bool,

    /// Non-strict handling of statements where only some rules resolved.
    #[serde(default)]
    pub partial_failure: PartialFailure,
}

/// What non-strict mode does when some table occurrences resolve and others fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailure {
    /// Scope the occurrences that resolved; failed ones become no-ops.
    #[default]
    ScopeResolved,
    /// Reject the statement with the first failure's code.
    Reject,
}
