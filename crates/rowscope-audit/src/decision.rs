//! Scope decision records.

use chrono::{DateTime, Utc};
use rowscope_core::{DenyCode, StatementKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome of evaluating one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeAction {
    /// Predicates were injected.
    Scoped,
    /// The statement was denied; the call never reaches the database.
    Rejected,
    /// A trusted bypass let the statement through unmodified.
    Bypassed,
    /// No protected table was involved; the statement runs unmodified.
    Passthrough,
}

impl fmt::Display for ScopeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped => write!(f, "SCOPED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Bypassed => write!(f, "BYPASSED"),
            Self::Passthrough => write!(f, "PASSTHROUGH"),
        }
    }
}

/// The engine's record of one statement evaluation.
///
/// Built fresh per statement and never mutated after it is handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDecision {
    /// Unique decision ID.
    pub decision_id: Uuid,

    /// When the decision was made.
    pub occurred_at: DateTime<Utc>,

    pub action: ScopeAction,

    /// Deny code, only for rejected statements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<DenyCode>,

    /// Position of the statement in a multi-statement call.
    pub statement_index: usize,

    pub statement_kind: StatementKind,

    /// Tables that received a predicate, one entry per occurrence.
    #[serde(default)]
    pub matched_tables: Vec<String>,

    /// Rules applied, one entry per occurrence.
    #[serde(default)]
    pub applied_rules: Vec<String>,

    /// Ruled tables left unscoped because their arguments could not be resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_tables: Vec<String>,

    /// Trusted actor, for bypassed statements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_actor: Option<String>,

    /// Human-readable detail for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Non-fatal findings such as unknown template tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ScopeDecision {
    fn new(action: ScopeAction, statement_index: usize, statement_kind: StatementKind) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            action,
            reason_code: None,
            statement_index,
            statement_kind,
            matched_tables: Vec::new(),
            applied_rules: Vec::new(),
            skipped_tables: Vec::new(),
            bypass_actor: None,
            message: None,
            warnings: Vec::new(),
        }
    }

    /// A statement that received predicates.
    pub fn scoped(
        statement_index: usize,
        statement_kind: StatementKind,
        matched_tables: Vec<String>,
        applied_rules: Vec<String>,
    ) -> Self {
        let mut decision = Self::new(ScopeAction::Scoped, statement_index, statement_kind);
        decision.matched_tables = matched_tables;
        decision.applied_rules = applied_rules;
        decision
    }

    /// A denied statement.
    pub fn rejected(
        statement_index: usize,
        statement_kind: StatementKind,
        code: DenyCode,
        message: impl Into<String>,
    ) -> Self {
        let mut decision = Self::new(ScopeAction::Rejected, statement_index, statement_kind);
        decision.reason_code = Some(code);
        decision.message = Some(message.into());
        decision
    }

    /// A statement let through by a trusted bypass.
    pub fn bypassed(
        statement_index: usize,
        statement_kind: StatementKind,
        actor: impl Into<String>,
    ) -> Self {
        let mut decision = Self::new(ScopeAction::Bypassed, statement_index, statement_kind);
        decision.bypass_actor = Some(actor.into());
        decision
    }

    /// A statement that runs unmodified.
    pub fn passthrough(statement_index: usize, statement_kind: StatementKind) -> Self {
        Self::new(ScopeAction::Passthrough, statement_index, statement_kind)
    }

    pub fn with_skipped_tables(mut self, skipped: Vec<String>) -> Self {
        self.skipped_tables = skipped;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Format the decision as a single log line.
    ///
    /// Format: `[timestamp] ACTION stmt=N kind=... [code=...] [tables=...]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} stmt={} kind={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.action,
            self.statement_index,
            self.statement_kind,
        );

        if let Some(code) = self.reason_code {
            line.push_str(&format!(" code={}", code));
        }
        if !self.matched_tables.is_empty() {
            line.push_str(&format!(" tables=[{}]", self.matched_tables.join(",")));
        }
        if !self.applied_rules.is_empty() {
            line.push_str(&format!(" rules=[{}]", self.applied_rules.join(",")));
        }
        if !self.skipped_tables.is_empty() {
            line.push_str(&format!(" skipped=[{}]", self.skipped_tables.join(",")));
        }
        if let Some(ref actor) = self.bypass_actor {
            line.push_str(&format!(" actor={}", actor));
        }
        if let Some(ref message) = self.message {
            line.push_str(&format!(" message=\"{}\"", message.replace('"', "'")));
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_serializes_reason_code() {
        let decision = ScopeDecision::rejected(
            0,
            StatementKind::Select,
            DenyCode::MissingContext,
            "no identity",
        );
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "rejected");
        assert_eq!(json["reason_code"], "missing_context");
        assert_eq!(json["statement_kind"], "select");
    }

    #[test]
    fn test_scoped_omits_reason_code() {
        let decision = ScopeDecision::scoped(
            1,
            StatementKind::Update,
            vec!["pipelines".to_string()],
            vec!["pipelines".to_string()],
        );
        let json = serde_json::to_value(&decision).unwrap();
        assert!(json.get("reason_code").is_none());
        assert!(json.get("skipped_tables").is_none());
        assert_eq!(json["matched_tables"][0], "pipelines");
    }

    #[test]
    fn test_log_line() {
        let line = ScopeDecision::bypassed(0, StatementKind::Delete, "reindex-job").to_log_line();
        assert!(line.contains("BYPASSED"));
        assert!(line.contains("kind=DELETE"));
        assert!(line.contains("actor=reindex-job"));
    }
}
