//! Per-statement policy decisions.
//!
//! The engine consults policy twice: once after rule matching (coverage)
//! and once after argument resolution. Bypass is checked before either.

use rowscope_core::{DenyCode, EnforcementModes, PartialFailure, StatementKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep going: resolve and inject.
    Proceed,
    /// Run the statement unmodified.
    Passthrough,
    Reject { code: DenyCode, message: String },
}

impl Verdict {
    fn reject(code: DenyCode, message: impl Into<String>) -> Self {
        Self::Reject {
            code,
            message: message.into(),
        }
    }
}

/// A ruled occurrence whose arguments could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub table: String,
    pub code: DenyCode,
    pub message: String,
}

/// Decide from the discovered tables whether the statement needs scoping.
///
/// `matched` counts ruled occurrences; `unmatched` names the others.
pub fn check_coverage(modes: &EnforcementModes, kind: StatementKind, matched: usize, unmatched: &[&str]) -> Verdict {
    if matched == 0 && !modes.strict_all_tables {
        return Verdict::Passthrough;
    }
    if kind == StatementKind::Unknown && modes.reject_unknown_shapes {
        return Verdict::reject(DenyCode::UnknownShape, "statement shape cannot be scoped");
    }
    if modes.strict_all_tables {
        if let Some(table) = unmatched.first() {
            return Verdict::reject(DenyCode::MissingRule, format!("no scope rule for table '{}'", table));
        }
    }
    if kind == StatementKind::Unknown {
        if modes.strict_mode && matched > 0 {
            return Verdict::reject(
                DenyCode::UnsupportedStatement,
                "statement type cannot be scoped but touches a protected table",
            );
        }
        return Verdict::Passthrough;
    }
    if matched == 0 {
        return Verdict::Passthrough;
    }
    Verdict::Proceed
}

/// Decide after resolution, given how many predicates rendered.
pub fn check_resolution(modes: &EnforcementModes, rendered: usize, failures: &[ResolutionFailure]) -> Verdict {
    if let Some(first) = failures.first() {
        if modes.strict_mode {
            return Verdict::reject(first.code, first.message.clone());
        }
        if modes.partial_failure == PartialFailure::Reject && rendered > 0 {
            return Verdict::reject(
                first.code,
                format!("partial scope failure on '{}': {}", first.table, first.message),
            );
        }
    }
    if rendered == 0 {
        if modes.strict_mode || modes.reject_unknown_shapes {
            return Verdict::reject(
                DenyCode::UnscopedStatement,
                "protected statement has no scoping predicate",
            );
        }
        return Verdict::Passthrough;
    }
    Verdict::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes(strict_mode: bool, reject_unknown_shapes: bool, strict_all_tables: bool) -> EnforcementModes {
        EnforcementModes {
            strict_mode,
            reject_unknown_shapes,
            strict_all_tables,
            partial_failure: PartialFailure::ScopeResolved,
        }
    }

    fn code(verdict: Verdict) -> Option<DenyCode> {
        match verdict {
            Verdict::Reject { code, .. } => Some(code),
            _ => None,
        }
    }

    fn failure(code: DenyCode) -> ResolutionFailure {
        ResolutionFailure {
            table: "pipelines".to_string(),
            code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_unprotected_statement_passes_through() {
        let v = check_coverage(&modes(true, true, false), StatementKind::Select, 0, &["audit_log"]);
        assert_eq!(v, Verdict::Passthrough);
        let v = check_coverage(&modes(true, true, false), StatementKind::Unknown, 0, &[]);
        assert_eq!(v, Verdict::Passthrough);
    }

    #[test]
    fn test_strict_all_tables_matrix() {
        let strict_all = modes(false, false, true);
        // all tables ruled
        assert_eq!(
            check_coverage(&strict_all, StatementKind::Select, 2, &[]),
            Verdict::Proceed
        );
        // one unruled table among ruled ones
        assert_eq!(
            code(check_coverage(&strict_all, StatementKind::Select, 1, &["audit_log"])),
            Some(DenyCode::MissingRule)
        );
        // only unruled tables
        assert_eq!(
            code(check_coverage(&strict_all, StatementKind::Select, 0, &["audit_log"])),
            Some(DenyCode::MissingRule)
        );
        // no tables at all
        assert_eq!(
            check_coverage(&strict_all, StatementKind::Select, 0, &[]),
            Verdict::Passthrough
        );
        // flag off: unruled tables are fine
        assert_eq!(
            check_coverage(&modes(false, false, false), StatementKind::Select, 1, &["audit_log"]),
            Verdict::Proceed
        );
    }

    #[test]
    fn test_unknown_shapes() {
        assert_eq!(
            code(check_coverage(&modes(false, true, false), StatementKind::Unknown, 1, &[])),
            Some(DenyCode::UnknownShape)
        );
        assert_eq!(
            code(check_coverage(&modes(true, false, false), StatementKind::Unknown, 1, &[])),
            Some(DenyCode::UnsupportedStatement)
        );
        assert_eq!(
            check_coverage(&modes(false, false, false), StatementKind::Unknown, 1, &[]),
            Verdict::Passthrough
        );
    }

    #[test]
    fn test_strict_resolution_failure_rejects() {
        let v = check_resolution(&modes(true, false, false), 1, &[failure(DenyCode::MissingContext)]);
        assert_eq!(code(v), Some(DenyCode::MissingContext));
    }

    #[test]
    fn test_partial_failure_policy() {
        let lenient = modes(false, false, false);
        assert_eq!(
            check_resolution(&lenient, 1, &[failure(DenyCode::ResolverFailed)]),
            Verdict::Proceed
        );

        let rejecting = EnforcementModes {
            partial_failure: PartialFailure::Reject,
            ..lenient
        };
        assert_eq!(
            code(check_resolution(&rejecting, 1, &[failure(DenyCode::ResolverFailed)])),
            Some(DenyCode::ResolverFailed)
        );
        // Nothing resolved: not a partial failure.
        assert_eq!(
            check_resolution(&rejecting, 0, &[failure(DenyCode::ResolverFailed)]),
            Verdict::Passthrough
        );
    }

    #[test]
    fn test_nothing_rendered() {
        assert_eq!(
            code(check_resolution(&modes(false, true, false), 0, &[failure(DenyCode::ResolverRequired)])),
            Some(DenyCode::UnscopedStatement)
        );
        assert_eq!(
            check_resolution(&modes(false, false, false), 0, &[failure(DenyCode::ResolverRequired)]),
            Verdict::Passthrough
        );
    }
}
