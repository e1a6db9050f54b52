//! The scope engine.
//!
//! [`ScopeEngine`] evaluates every statement of a call in order: bypass
//! gate, table discovery, rule matching, coverage policy, argument
//! resolution, rendering, and finally predicate insertion. Any rejected
//! statement rejects the whole call; otherwise all insertions are applied
//! to the original text in one pass.
//!
//! Auditing follows the call, not the text: a scoped call records one
//! decision per statement, while a rejected call records only the
//! rejection. Statements after the rejected one are not evaluated, and the
//! decisions planned for earlier statements are dropped because none of
//! them reaches the database.
//!
//! The engine is immutable once built and is meant to be shared behind an
//! `Arc` across concurrent callers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rowscope_audit::{AuditSink, ScopeAction, ScopeDecision, TracingSink};
use rowscope_core::{
    BypassConfig, DenyCode, Dialect, EnforcementModes, PartialFailure, ScopeConfig, ScopeContext,
};
use serde_json::Value;

use crate::bypass::{BypassGate, BypassOutcome};
use crate::classifier::classify;
use crate::error::{BuildError, HookError, ScopeError};
use crate::hook::{QueryCall, QueryHook};
use crate::lexer::{StatementSpan, Tokens};
use crate::policy::{ResolutionFailure, Verdict, check_coverage, check_resolution};
use crate::render::{RenderedPredicate, bind_values, param_slots, render};
use crate::resolver::{ArgResolver, ContextResolver, ResolveError, resolve_with_deadline};
use crate::rewrite::{Insertion, assemble, filter_insertions};
use crate::rules::{RuleSet, ScopeRule};
use crate::tables::{Discovery, TableRef, discover, discover_loose};

/// A successfully scoped call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    pub sql: String,
    pub args: Vec<Value>,
    /// One decision per statement.
    pub decisions: Vec<ScopeDecision>,
}

/// Result of evaluating a call without recording it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub sql: String,
    pub args: Vec<Value>,
    /// One decision per statement, or only the rejection.
    pub decisions: Vec<ScopeDecision>,
    pub rejection: Option<ScopeError>,
}

impl Evaluation {
    pub fn into_result(self) -> Result<ScopedQuery, ScopeError> {
        match self.rejection {
            Some(err) => Err(err),
            None => Ok(ScopedQuery {
                sql: self.sql,
                args: self.args,
                decisions: self.decisions,
            }),
        }
    }
}

type ResolverCache = HashMap<usize, Result<Vec<Value>, ResolveError>>;

struct StatementPlan {
    decision: ScopeDecision,
    insertions: Vec<Insertion>,
}

impl StatementPlan {
    fn unchanged(decision: ScopeDecision) -> Self {
        Self {
            decision,
            insertions: Vec::new(),
        }
    }
}

struct Rejection {
    decision: ScopeDecision,
    error: ScopeError,
}

pub struct ScopeEngine {
    rules: RuleSet,
    default_resolver: Option<Arc<dyn ArgResolver>>,
    modes: EnforcementModes,
    gate: BypassGate,
    dialect: Dialect,
    sink: Arc<dyn AuditSink>,
}

impl ScopeEngine {
    pub fn builder() -> ScopeEngineBuilder {
        ScopeEngineBuilder::default()
    }

    /// Dialect used by [`rewrite`](Self::rewrite).
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn modes(&self) -> &EnforcementModes {
        &self.modes
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Scope `sql` for the engine's configured dialect and record the decisions.
    pub async fn rewrite(&self, ctx: &ScopeContext, sql: &str, args: Vec<Value>) -> Result<ScopedQuery, ScopeError> {
        self.rewrite_for(self.dialect, ctx, sql, args).await
    }

    /// Scope `sql` for an explicit dialect and record the decisions.
    pub async fn rewrite_for(
        &self,
        dialect: Dialect,
        ctx: &ScopeContext,
        sql: &str,
        args: Vec<Value>,
    ) -> Result<ScopedQuery, ScopeError> {
        let evaluation = self.evaluate(dialect, ctx, sql, args).await;
        for decision in &evaluation.decisions {
            self.sink.record(decision.clone());
        }
        evaluation.into_result()
    }

    /// Evaluate a call without sending anything to the audit sink.
    pub async fn evaluate(&self, dialect: Dialect, ctx: &ScopeContext, sql: &str, args: Vec<Value>) -> Evaluation {
        let toks = Tokens::new(sql, dialect);
        let mut cache = ResolverCache::new();
        let mut insertions = Vec::new();
        let mut decisions = Vec::new();

        for (index, span) in toks.statements().iter().enumerate() {
            match self.plan_statement(&toks, index, span, ctx, &mut cache).await {
                Ok(plan) => {
                    insertions.extend(plan.insertions);
                    decisions.push(plan.decision);
                }
                Err(rejection) => {
                    tracing::debug!(
                        statement = index,
                        code = %rejection.error.code,
                        "Rejected query"
                    );
                    return Evaluation {
                        sql: sql.to_string(),
                        args,
                        decisions: vec![rejection.decision],
                        rejection: Some(rejection.error),
                    };
                }
            }
        }

        if insertions.is_empty() {
            return Evaluation {
                sql: sql.to_string(),
                args,
                decisions,
                rejection: None,
            };
        }

        let assembled = assemble(&toks, insertions, dialect, args);
        for warning in &assembled.warnings {
            tracing::warn!(warning = %warning, "Argument count inconsistency");
        }
        for decision in decisions.iter_mut().filter(|d| d.action == ScopeAction::Scoped) {
            decision.warnings.extend(assembled.warnings.iter().cloned());
        }
        tracing::debug!(
            statements = decisions.len(),
            args = assembled.args.len(),
            "Scoped query"
        );
        Evaluation {
            sql: assembled.sql,
            args: assembled.args,
            decisions,
            rejection: None,
        }
    }

    async fn plan_statement(
        &self,
        toks: &Tokens<'_>,
        index: usize,
        span: &StatementSpan,
        ctx: &ScopeContext,
        cache: &mut ResolverCache,
    ) -> Result<StatementPlan, Rejection> {
        let classification = classify(toks, span.tokens.clone());
        let kind = classification.kind;
        let reject = |code: DenyCode, message: String| Rejection {
            decision: ScopeDecision::rejected(index, kind, code, message.clone()),
            error: ScopeError::new(code, index, message),
        };

        match self.gate.evaluate(&toks.sql()[span.segment.clone()], ctx) {
            BypassOutcome::NotRequested => {}
            BypassOutcome::Granted { actor } => {
                tracing::info!(statement = index, actor = %actor, "Trusted bypass granted");
                return Ok(StatementPlan::unchanged(ScopeDecision::bypassed(index, kind, actor)));
            }
            BypassOutcome::Denied { code, message } => return Err(reject(code, message)),
        }

        let discovery = if kind.is_scopable() {
            discover(toks, span.tokens.clone(), &classification)
        } else {
            Discovery {
                scopes: Vec::new(),
                tables: discover_loose(toks, span.tokens.clone()),
            }
        };
        let matches = self.rules.match_tables(&discovery.tables);
        let unmatched: Vec<&str> = matches
            .unmatched
            .iter()
            .map(|&t| discovery.tables[t].name.as_str())
            .collect();

        match check_coverage(&self.modes, kind, matches.matched.len(), &unmatched) {
            Verdict::Proceed => {}
            Verdict::Passthrough => {
                return Ok(StatementPlan::unchanged(ScopeDecision::passthrough(index, kind)));
            }
            Verdict::Reject { code, message } => return Err(reject(code, message)),
        }

        let mut per_scope: BTreeMap<usize, Vec<_>> = BTreeMap::new();
        let mut matched_tables = Vec::new();
        let mut applied_rules = Vec::new();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for &(t, r) in &matches.matched {
            let (Some(table), Some(rule)) = (discovery.tables.get(t), self.rules.get(r)) else {
                continue;
            };
            match self.render_occurrence(rule, r, table, ctx, cache).await {
                Ok(rendered) => {
                    for token in &rendered.unknown_tokens {
                        tracing::warn!(rule = rule.id(), token = %token, "Unknown template token left verbatim");
                        warnings.push(format!("rule '{}': unknown template token {}", rule.id(), token));
                    }
                    let Some(scope) = table.scope else {
                        continue;
                    };
                    per_scope.entry(scope).or_default().push(rendered.fragments);
                    matched_tables.push(table.name.clone());
                    applied_rules.push(rule.id().to_string());
                }
                Err(failure) => {
                    tracing::warn!(
                        table = %failure.table,
                        code = %failure.code,
                        error = %failure.message,
                        "Scope rule could not be applied"
                    );
                    failures.push(failure);
                }
            }
        }

        let skipped: Vec<String> = failures.iter().map(|f| f.table.clone()).collect();
        match check_resolution(&self.modes, matched_tables.len(), &failures) {
            Verdict::Proceed => {}
            Verdict::Passthrough => {
                let decision = ScopeDecision::passthrough(index, kind)
                    .with_skipped_tables(skipped)
                    .with_warnings(warnings);
                return Ok(StatementPlan::unchanged(decision));
            }
            Verdict::Reject { code, message } => return Err(reject(code, message)),
        }

        let mut insertions = Vec::new();
        for (scope, predicates) in per_scope {
            if let Some(scope) = discovery.scopes.get(scope) {
                insertions.extend(filter_insertions(toks, scope, predicates));
            }
        }
        let decision = ScopeDecision::scoped(index, kind, matched_tables, applied_rules)
            .with_skipped_tables(skipped)
            .with_warnings(warnings);
        Ok(StatementPlan {
            decision,
            insertions,
        })
    }

    async fn render_occurrence(
        &self,
        rule: &ScopeRule,
        rule_idx: usize,
        table: &TableRef,
        ctx: &ScopeContext,
        cache: &mut ResolverCache,
    ) -> Result<RenderedPredicate, ResolutionFailure> {
        let fail = |code: DenyCode, message: String| ResolutionFailure {
            table: table.name.clone(),
            code,
            message,
        };
        let Some(template) = rule.template() else {
            return Err(fail(
                DenyCode::UnscopedStatement,
                format!("rule '{}' has neither a column nor a predicate", rule.id()),
            ));
        };

        let slots = param_slots(&template);
        let values = if slots == 0 {
            Vec::new()
        } else {
            let resolved = match cache.get(&rule_idx) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self.resolve(rule, ctx).await;
                    cache.insert(rule_idx, resolved.clone());
                    resolved
                }
            };
            resolved.map_err(|e| fail(e.deny_code(), e.to_string()))?
        };
        let bound = bind_values(slots, values).map_err(|e| fail(DenyCode::ParamMismatch, e.to_string()))?;
        Ok(render(&template, table.qualifier(), &bound))
    }

    async fn resolve(&self, rule: &ScopeRule, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        let Some(resolver) = rule.resolver().or(self.default_resolver.as_ref()) else {
            return Err(ResolveError::Unavailable(format!(
                "no resolver configured for table '{}'",
                rule.table()
            )));
        };
        let values = resolve_with_deadline(resolver.as_ref(), ctx).await?;
        if values.is_empty() {
            return Err(ResolveError::Unavailable(format!(
                "resolver returned no values for table '{}'",
                rule.table()
            )));
        }
        Ok(values)
    }
}

#[async_trait]
impl QueryHook for ScopeEngine {
    async fn before(&self, ctx: &ScopeContext, call: &mut QueryCall) -> Result<(), HookError> {
        let scoped = self
            .rewrite_for(call.dialect, ctx, &call.query, call.args.clone())
            .await?;
        call.query = scoped.sql;
        call.args = scoped.args;
        Ok(())
    }
}

/// Builder for [`ScopeEngine`].
///
/// The default resolver reads the identity subject; the default sink emits
/// `tracing` events.
pub struct ScopeEngineBuilder {
    rules: Vec<ScopeRule>,
    default_resolver: Option<Arc<dyn ArgResolver>>,
    modes: EnforcementModes,
    bypass: BypassConfig,
    dialect: Dialect,
    sink: Arc<dyn AuditSink>,
}

impl Default for ScopeEngineBuilder {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_resolver: Some(Arc::new(ContextResolver::subject())),
            modes: EnforcementModes::default(),
            bypass: BypassConfig::default(),
            dialect: Dialect::default(),
            sink: Arc::new(TracingSink),
        }
    }
}

impl ScopeEngineBuilder {
    /// Start from a loaded configuration.
    pub fn from_config(config: &ScopeConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let mut builder = Self::default()
            .modes(config.modes)
            .bypass(config.bypass.clone());
        if let Some(driver) = &config.dialect {
            builder = builder.dialect(Dialect::from_driver_name(driver));
        }
        if let Some(claim) = &config.identity_claim {
            builder = builder.default_resolver(ContextResolver::claim(claim.clone()));
        }
        Ok(builder.rules(config.rules.iter().map(ScopeRule::from_config)))
    }

    pub fn rule(mut self, rule: ScopeRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = ScopeRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn default_resolver(mut self, resolver: impl ArgResolver + 'static) -> Self {
        self.default_resolver = Some(Arc::new(resolver));
        self
    }

    /// Remove the default resolver; rules without their own resolver then
    /// fail with `resolver_required`.
    pub fn no_default_resolver(mut self) -> Self {
        self.default_resolver = None;
        self
    }

    pub fn modes(mut self, modes: EnforcementModes) -> Self {
        self.modes = modes;
        self
    }

    pub fn strict_mode(mut self, on: bool) -> Self {
        self.modes.strict_mode = on;
        self
    }

    pub fn reject_unknown_shapes(mut self, on: bool) -> Self {
        self.modes.reject_unknown_shapes = on;
        self
    }

    pub fn strict_all_tables(mut self, on: bool) -> Self {
        self.modes.strict_all_tables = on;
        self
    }

    pub fn partial_failure(mut self, policy: PartialFailure) -> Self {
        self.modes.partial_failure = policy;
        self
    }

    pub fn bypass(mut self, bypass: BypassConfig) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn allow_trusted_bypass(mut self, on: bool) -> Self {
        self.bypass.allow_trusted = on;
        self
    }

    pub fn require_bypass_token(mut self, on: bool) -> Self {
        self.bypass.require_token = on;
        self
    }

    pub fn require_bypass_reason(mut self, on: bool) -> Self {
        self.bypass.require_reason = on;
        self
    }

    pub fn bypass_token(mut self, token: impl Into<String>) -> Self {
        self.bypass.token = token.into();
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn build(self) -> Result<ScopeEngine, BuildError> {
        if self.bypass.token.trim().is_empty() {
            return Err(BuildError::EmptyBypassToken);
        }
        if let Some(rule) = self.rules.iter().find(|r| r.template().is_none()) {
            return Err(BuildError::IncompleteRule(rule.table().to_string()));
        }
        let rules: RuleSet = self.rules.into_iter().collect();
        tracing::debug!(
            rules = rules.len(),
            dialect = %self.dialect,
            strict_mode = self.modes.strict_mode,
            "Built scope engine"
        );
        Ok(ScopeEngine {
            rules,
            default_resolver: self.default_resolver,
            modes: self.modes,
            gate: BypassGate::from_config(&self.bypass),
            dialect: self.dialect,
            sink: self.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FnResolver, StaticResolver};
    use pretty_assertions::assert_eq;
    use rowscope_audit::MemorySink;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> ScopeEngine {
        ScopeEngine::builder()
            .rule(ScopeRule::column("pipelines", "user_id"))
            .build()
            .unwrap()
    }

    fn user(id: i64) -> ScopeContext {
        ScopeContext::for_subject(id)
    }

    #[tokio::test]
    async fn test_scopes_simple_select() {
        let out = engine()
            .rewrite(&user(1), "SELECT * FROM pipelines", vec![])
            .await
            .unwrap();
        assert_eq!(out.sql, "SELECT * FROM pipelines WHERE (pipelines.user_id = ?)");
        assert_eq!(out.args, vec![json!(1)]);
        assert_eq!(out.decisions[0].action, ScopeAction::Scoped);
        assert_eq!(out.decisions[0].matched_tables, vec!["pipelines".to_string()]);
    }

    #[tokio::test]
    async fn test_unprotected_passthrough() {
        let out = engine()
            .rewrite(&user(1), "SELECT * FROM audit_log", vec![json!(1)])
            .await
            .unwrap();
        assert_eq!(out.sql, "SELECT * FROM audit_log");
        assert_eq!(out.args, vec![json!(1)]);
        assert_eq!(out.decisions[0].action, ScopeAction::Passthrough);
    }

    #[tokio::test]
    async fn test_self_join_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let engine = ScopeEngine::builder()
            .rule(ScopeRule::column("pipelines", "user_id").with_resolver(FnResolver::new(
                move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, ResolveError>(vec![json!(7)]) }
                },
            )))
            .build()
            .unwrap();
        let out = engine
            .rewrite(
                &ScopeContext::new(),
                "SELECT * FROM pipelines a JOIN pipelines b ON a.parent_id = b.id",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(
            out.sql,
            "SELECT * FROM pipelines a JOIN pipelines b ON a.parent_id = b.id WHERE (a.user_id = ?) AND (b.user_id = ?)"
        );
        assert_eq!(out.args, vec![json!(7), json!(7)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_records_only_rejection() {
        let sink = MemorySink::new();
        let engine = ScopeEngine::builder()
            .rule(ScopeRule::column("pipelines", "user_id"))
            .strict_mode(true)
            .audit_sink(sink.clone())
            .build()
            .unwrap();
        let err = engine
            .rewrite(
                &ScopeContext::new(),
                "SELECT 1; SELECT * FROM pipelines",
                vec![],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, DenyCode::MissingContext);
        assert_eq!(err.statement_index, 1);
        let decisions = sink.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, ScopeAction::Rejected);
        assert_eq!(decisions[0].statement_index, 1);
    }

    #[tokio::test]
    async fn test_non_strict_failure_is_skipped() {
        let out = engine()
            .rewrite(&ScopeContext::new(), "SELECT * FROM pipelines", vec![])
            .await
            .unwrap();
        assert_eq!(out.sql, "SELECT * FROM pipelines");
        assert_eq!(out.decisions[0].action, ScopeAction::Passthrough);
        assert_eq!(out.decisions[0].skipped_tables, vec!["pipelines".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_slot_predicate_needs_no_resolver() {
        let engine = ScopeEngine::builder()
            .rule(ScopeRule::predicate("pipelines", "{{alias}}.deleted_at IS NULL"))
            .no_default_resolver()
            .strict_mode(true)
            .build()
            .unwrap();
        let out = engine
            .rewrite(&ScopeContext::new(), "SELECT * FROM pipelines p", vec![])
            .await
            .unwrap();
        assert_eq!(out.sql, "SELECT * FROM pipelines p WHERE (p.deleted_at IS NULL)");
        assert!(out.args.is_empty());
    }

    #[tokio::test]
    async fn test_no_resolver_is_resolver_required() {
        let engine = ScopeEngine::builder()
            .rule(ScopeRule::column("pipelines", "user_id"))
            .no_default_resolver()
            .strict_mode(true)
            .build()
            .unwrap();
        let err = engine
            .rewrite(&user(1), "SELECT * FROM pipelines", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code, DenyCode::ResolverRequired);
    }

    #[tokio::test]
    async fn test_param_mismatch() {
        let engine = ScopeEngine::builder()
            .rule(
                ScopeRule::predicate("pipelines", "{{alias}}.a = {{param}} AND {{alias}}.b = {{param}}")
                    .with_resolver(StaticResolver::new(vec![json!(1), json!(2), json!(3)])),
            )
            .strict_mode(true)
            .build()
            .unwrap();
        let err = engine
            .rewrite(&user(1), "SELECT * FROM pipelines", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code, DenyCode::ParamMismatch);
    }

    #[tokio::test]
    async fn test_evaluate_does_not_audit() {
        let sink = MemorySink::new();
        let engine = ScopeEngine::builder()
            .rule(ScopeRule::column("pipelines", "user_id"))
            .audit_sink(sink.clone())
            .build()
            .unwrap();
        let evaluation = engine
            .evaluate(Dialect::Dollar, &user(1), "SELECT * FROM pipelines", vec![])
            .await;
        assert_eq!(evaluation.sql, "SELECT * FROM pipelines WHERE (pipelines.user_id = $1)");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_build_rejects_incomplete_rule() {
        let result = ScopeEngine::builder()
            .rule(ScopeRule::predicate("pipelines", ""))
            .build();
        assert!(matches!(result, Err(BuildError::IncompleteRule(t)) if t == "pipelines"));

        let result = ScopeEngine::builder().bypass_token(" ").build();
        assert!(matches!(result, Err(BuildError::EmptyBypassToken)));
    }

    #[test]
    fn test_from_config() {
        let config = ScopeConfig::from_yaml(
            r#"
dialect: postgres
identity_claim: user_id
modes:
  strict_mode: true
rules:
  - table: pipelines
    column: user_id
"#,
        )
        .unwrap();
        let engine = ScopeEngineBuilder::from_config(&config).unwrap().build().unwrap();
        assert_eq!(engine.dialect(), Dialect::Dollar);
        assert!(engine.modes().strict_mode);
        assert_eq!(engine.rules().len(), 1);
    }
}
