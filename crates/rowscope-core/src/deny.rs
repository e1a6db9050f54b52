//! Deterministic deny codes.
//!
//! Every rejected statement carries exactly one of these codes. The string
//! forms are a stable contract: API layers map them to their own status
//! vocabulary, usually through [`DenyCode::http_status`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a statement was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCode {
    /// The call context carried no identity.
    MissingContext,
    /// The statement could not be classified and unknown shapes are rejected.
    UnknownShape,
    /// A discovered table has no rule while every table must be ruled.
    MissingRule,
    /// No resolver is configured, or the context has no usable value for it.
    ResolverRequired,
    /// The resolver ran and returned an error.
    ResolverFailed,
    /// Resolved values do not fit the predicate's `{{param}}` slots.
    ParamMismatch,
    /// A protected statement ended up without any rendered predicate.
    UnscopedStatement,
    /// A statement type the engine cannot scope touches a protected table.
    UnsupportedStatement,
    /// A bypass was requested without trust or with bypass disabled.
    BypassNotAllowed,
    /// A trusted bypass carried no reason while one is required.
    BypassMissingReason,
    /// A trusted bypass was requested without the in-query token.
    BypassTokenRequired,
}

impl DenyCode {
    /// All codes, in declaration order.
    pub const ALL: [DenyCode; 11] = [
        DenyCode::MissingContext,
        DenyCode::UnknownShape,
        DenyCode::MissingRule,
        DenyCode::ResolverRequired,
        DenyCode::ResolverFailed,
        DenyCode::ParamMismatch,
        DenyCode::UnscopedStatement,
        DenyCode::UnsupportedStatement,
        DenyCode::BypassNotAllowed,
        DenyCode::BypassMissingReason,
        DenyCode::BypassTokenRequired,
    ];

    /// The stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyCode::MissingContext => "missing_context",
            DenyCode::UnknownShape => "unknown_shape",
            DenyCode::MissingRule => "missing_rule",
            DenyCode::ResolverRequired => "resolver_required",
            DenyCode::ResolverFailed => "resolver_failed",
            DenyCode::ParamMismatch => "param_mismatch",
            DenyCode::UnscopedStatement => "unscoped_statement",
            DenyCode::UnsupportedStatement => "unsupported_statement",
            DenyCode::BypassNotAllowed => "bypass_not_allowed",
            DenyCode::BypassMissingReason => "bypass_missing_reason",
            DenyCode::BypassTokenRequired => "bypass_token_required",
        }
    }

    /// Suggested HTTP status for API layers.
    ///
    /// Bypass-policy denials are `403`, caller-context problems `400`,
    /// shape and coverage problems `422`, resolver and rule-template
    /// failures `500`.
    pub fn http_status(&self) -> u16 {
        match self {
            DenyCode::BypassNotAllowed
            | DenyCode::BypassMissingReason
            | DenyCode::BypassTokenRequired => 403,
            DenyCode::MissingContext | DenyCode::ResolverRequired => 400,
            DenyCode::UnknownShape
            | DenyCode::MissingRule
            | DenyCode::UnscopedStatement
            | DenyCode::UnsupportedStatement => 422,
            DenyCode::ResolverFailed | DenyCode::ParamMismatch => 500,
        }
    }

    /// Whether the caller can fix the denial by retrying with a corrected context.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            DenyCode::MissingContext
                | DenyCode::ResolverRequired
                | DenyCode::ResolverFailed
                | DenyCode::ParamMismatch
        )
    }
}

impl fmt::Display for DenyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown deny code string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown deny code: {0}")]
pub struct UnknownDenyCode(pub String);

impl FromStr for DenyCode {
    type Err = UnknownDenyCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DenyCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownDenyCode(s.to_string()))
    }
}
