//! Per-call scope context.
//!
//! A [`ScopeContext`] travels with every query call. It carries the caller's
//! identity (read by argument resolvers) and, for trusted internal callers,
//! a [`TrustedBypass`] marker. The engine never authenticates either value:
//! it only checks presence, so the host application must only set them from
//! sources it trusts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Caller identity: a subject plus named claims.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Primary subject, usually a user id. `Null` when only claims are known.
    #[serde(default)]
    pub subject: Value,

    /// Additional claims such as `org_id` or `tenant_id`.
    #[serde(default)]
    pub claims: BTreeMap<String, Value>,
}

impl Identity {
    /// Create an identity for a subject.
    pub fn new(subject: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            claims: BTreeMap::new(),
        }
    }

    /// Add a claim.
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    /// Look up a claim, treating JSON `null` as absent.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name).filter(|v| !v.is_null())
    }

    /// The subject, treating JSON `null` as absent.
    pub fn subject(&self) -> Option<&Value> {
        Some(&self.subject).filter(|v| !v.is_null())
    }
}

/// Marker placed in the context by a trusted caller (e.g. a maintenance job).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedBypass {
    /// Who is bypassing, for the audit trail.
    pub actor: String,
    /// Why. May be required by configuration.
    #[serde(default)]
    pub reason: String,
}

impl TrustedBypass {
    pub fn new(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            reason: reason.into(),
        }
    }

    /// Whether a non-blank reason was given.
    pub fn has_reason(&self) -> bool {
        !self.reason.trim().is_empty()
    }
}

/// Context for one query call.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    identity: Option<Identity>,
    bypass: Option<TrustedBypass>,
    deadline: Option<Instant>,
}

impl ScopeContext {
    /// An empty context: no identity, no bypass marker, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a subject with no extra claims.
    pub fn for_subject(subject: impl Into<Value>) -> Self {
        Self::new().with_identity(Identity::new(subject))
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Add a claim, creating a subject-less identity if none is set.
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let identity = self.identity.take().unwrap_or_default();
        self.identity = Some(identity.with_claim(name, value));
        self
    }

    /// Mark the call as coming from a trusted caller.
    pub fn with_trusted_bypass(mut self, marker: TrustedBypass) -> Self {
        self.bypass = Some(marker);
        self
    }

    /// Bound the time argument resolution may take.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn trusted_bypass(&self) -> Option<&TrustedBypass> {
        self.bypass.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claim_without_identity_creates_subjectless_identity() {
        let ctx = ScopeContext::new().with_claim("org_id", 7);
        let identity = ctx.identity().unwrap();
        assert_eq!(identity.subject(), None);
        assert_eq!(identity.claim("org_id"), Some(&json!(7)));
    }

    #[test]
    fn test_null_values_are_absent() {
        let identity = Identity::new(Value::Null).with_claim("org_id", Value::Null);
        assert!(identity.subject().is_none());
        assert!(identity.claim("org_id").is_none());
    }

    #[test]
    fn test_trusted_bypass_reason() {
        assert!(TrustedBypass::new("reindex-job", "nightly reindex").has_reason());
        assert!(!TrustedBypass::new("reindex-job", "   ").has_reason());
    }
}
