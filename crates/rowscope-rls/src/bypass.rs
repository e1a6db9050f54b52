//! Trusted bypass gate.
//!
//! A bypass needs two independent signals: the trusted marker in the
//! [`ScopeContext`] (set by the host application, never authenticated here)
//! and the bypass token written into the SQL itself. Which of them are
//! required is configuration.

use rowscope_core::{BypassConfig, DenyCode, ScopeContext};

/// Result of checking one statement for a bypass request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassOutcome {
    /// No bypass requested; evaluate normally.
    NotRequested,
    /// Run the statement unmodified.
    Granted { actor: String },
    /// A bypass was requested but policy refuses it.
    Denied { code: DenyCode, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassGate {
    allow_trusted: bool,
    require_token: bool,
    require_reason: bool,
    token: String,
}

impl Default for BypassGate {
    fn default() -> Self {
        Self::from_config(&BypassConfig::default())
    }
}

impl BypassGate {
    pub fn from_config(config: &BypassConfig) -> Self {
        Self {
            allow_trusted: config.allow_trusted,
            require_token: config.require_token,
            require_reason: config.require_reason,
            token: config.token.clone(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Check `statement`, the statement text including its comments.
    pub fn evaluate(&self, statement: &str, ctx: &ScopeContext) -> BypassOutcome {
        let token_present = !self.token.is_empty() && statement.contains(&self.token);
        let marker = ctx.trusted_bypass();
        let requested = token_present || (self.allow_trusted && marker.is_some());
        if !requested {
            return BypassOutcome::NotRequested;
        }

        let Some(marker) = marker.filter(|_| self.allow_trusted) else {
            let message = if self.allow_trusted {
                "bypass token present but the caller is not trusted"
            } else {
                "bypass token present but trusted bypass is disabled"
            };
            return denied(DenyCode::BypassNotAllowed, message);
        };
        if !token_present && self.require_token {
            return denied(
                DenyCode::BypassTokenRequired,
                format!("trusted bypass by '{}' requires the bypass token in the query", marker.actor),
            );
        }
        if self.require_reason && !marker.has_reason() {
            return denied(
                DenyCode::BypassMissingReason,
                format!("trusted bypass by '{}' carries no reason", marker.actor),
            );
        }
        BypassOutcome::Granted {
            actor: marker.actor.clone(),
        }
    }
}

fn denied(code: DenyCode, message: impl Into<String>) -> BypassOutcome {
    BypassOutcome::Denied {
        code,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowscope_core::TrustedBypass;

    const SQL: &str = "SELECT * FROM pipelines";
    const BYPASS_SQL: &str = "/* scope:bypass */ SELECT * FROM pipelines";

    fn gate(allow_trusted: bool, require_token: bool, require_reason: bool) -> BypassGate {
        BypassGate::from_config(&BypassConfig {
            allow_trusted,
            require_token,
            require_reason,
            ..BypassConfig::default()
        })
    }

    fn trusted(reason: &str) -> ScopeContext {
        ScopeContext::for_subject(1).with_trusted_bypass(TrustedBypass::new("reindex-job", reason))
    }

    fn code(outcome: BypassOutcome) -> Option<DenyCode> {
        match outcome {
            BypassOutcome::Denied { code, .. } => Some(code),
            _ => None,
        }
    }

    #[test]
    fn test_not_requested() {
        assert_eq!(gate(true, true, false).evaluate(SQL, &ScopeContext::new()), BypassOutcome::NotRequested);
        // Marker alone is ignored while trusted bypass is disabled.
        assert_eq!(gate(false, true, false).evaluate(SQL, &trusted("x")), BypassOutcome::NotRequested);
    }

    #[test]
    fn test_token_without_trust() {
        let outcome = gate(true, true, false).evaluate(BYPASS_SQL, &ScopeContext::for_subject(1));
        assert_eq!(code(outcome), Some(DenyCode::BypassNotAllowed));

        let outcome = gate(false, true, false).evaluate(BYPASS_SQL, &trusted("x"));
        assert_eq!(code(outcome), Some(DenyCode::BypassNotAllowed));
    }

    #[test]
    fn test_marker_without_token() {
        let outcome = gate(true, true, false).evaluate(SQL, &trusted("x"));
        assert_eq!(code(outcome), Some(DenyCode::BypassTokenRequired));

        let outcome = gate(true, false, false).evaluate(SQL, &trusted("x"));
        assert_eq!(
            outcome,
            BypassOutcome::Granted {
                actor: "reindex-job".to_string()
            }
        );
    }

    #[test]
    fn test_reason_required() {
        let outcome = gate(true, true, true).evaluate(BYPASS_SQL, &trusted("  "));
        assert_eq!(code(outcome), Some(DenyCode::BypassMissingReason));

        let outcome = gate(true, true, true).evaluate(BYPASS_SQL, &trusted("nightly reindex"));
        assert!(matches!(outcome, BypassOutcome::Granted { .. }));
    }

    #[test]
    fn test_custom_token() {
        let gate = BypassGate::from_config(&BypassConfig {
            allow_trusted: true,
            token: "-- rowscope:skip".to_string(),
            ..BypassConfig::default()
        });
        assert!(matches!(
            gate.evaluate("SELECT 1 -- rowscope:skip", &trusted("x")),
            BypassOutcome::Granted { .. }
        ));
        assert_eq!(
            code(gate.evaluate(BYPASS_SQL, &trusted("x"))),
            Some(DenyCode::BypassTokenRequired)
        );
    }
}
