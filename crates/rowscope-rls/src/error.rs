//! Error types for scoping and hooked execution.

use rowscope_core::DenyCode;
use thiserror::Error;

/// A rejected call. Carries the deny code of the first rejected statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("statement {statement_index} rejected [{code}]: {message}")]
pub struct ScopeError {
    pub code: DenyCode,
    pub statement_index: usize,
    pub message: String,
}

impl ScopeError {
    pub fn new(code: DenyCode, statement_index: usize, message: impl Into<String>) -> Self {
        Self {
            code,
            statement_index,
            message: message.into(),
        }
    }

    pub fn deny_code(&self) -> DenyCode {
        self.code
    }
}

/// Error raised by a [`QueryHook`](crate::hook::QueryHook).
#[derive(Debug, Error)]
pub enum HookError {
    #[error("query rejected by scope engine")]
    Scope(#[from] ScopeError),

    #[error("query hook failed: {0}")]
    Other(String),
}

/// Error from a [`HookedExecutor`](crate::hook::HookedExecutor) call.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A hook aborted the call before it reached the database.
    #[error("query aborted before execution")]
    Hook(#[from] HookError),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Build-time configuration errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("rule for table '{0}' has neither a column nor a predicate")]
    IncompleteRule(String),

    #[error("bypass token must not be blank")]
    EmptyBypassToken,

    #[error("invalid configuration: {0}")]
    Config(#[from] rowscope_core::ConfigError),
}

/// Find the deny code anywhere in an error's source chain.
///
/// Works through any wrapping that preserves `source()`, including
/// `anyhow::Error` chains and [`ExecError`].
pub fn deny_code_from_error(err: &(dyn std::error::Error + 'static)) -> Option<DenyCode> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(scope) = e.downcast_ref::<ScopeError>() {
            return Some(scope.code);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_code_through_wrapping() {
        let err = ExecError::Hook(HookError::Scope(ScopeError::new(
            DenyCode::MissingRule,
            1,
            "no rule for audit_log",
        )));
        assert_eq!(deny_code_from_error(&err), Some(DenyCode::MissingRule));

        let wrapped = anyhow::Error::new(err).context("listing pipelines");
        let dyn_err: &(dyn std::error::Error + 'static) = wrapped.as_ref();
        assert_eq!(deny_code_from_error(dyn_err), Some(DenyCode::MissingRule));
    }

    #[test]
    fn test_no_deny_code_for_database_errors() {
        let err = ExecError::Database(anyhow::anyhow!("connection reset"));
        assert_eq!(deny_code_from_error(&err), None);
    }

    #[test]
    fn test_display() {
        let err = ScopeError::new(DenyCode::MissingContext, 0, "no identity in context");
        assert_eq!(
            err.to_string(),
            "statement 0 rejected [missing_context]: no identity in context"
        );
    }
}
