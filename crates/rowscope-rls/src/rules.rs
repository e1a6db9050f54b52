//! Scope rules and rule lookup.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rowscope_core::RuleConfig;

use crate::render::column_template;
use crate::resolver::{ArgResolver, ClaimResolver, StaticResolver};
use crate::tables::TableRef;

/// A per-table scoping rule.
///
/// Either a column (`{{alias}}.<column> = {{param}}`) or an explicit
/// predicate template; the template wins when both are set.
#[derive(Clone)]
pub struct ScopeRule {
    table: String,
    id: Option<String>,
    column: Option<String>,
    predicate: Option<String>,
    resolver: Option<Arc<dyn ArgResolver>>,
}

impl ScopeRule {
    /// A column-mode rule.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: None,
            column: Some(column.into()),
            predicate: None,
            resolver: None,
        }
    }

    /// A template-mode rule.
    pub fn predicate(table: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: None,
            column: None,
            predicate: Some(template.into()),
            resolver: None,
        }
    }

    /// Use this resolver instead of the engine default.
    pub fn with_resolver(mut self, resolver: impl ArgResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_shared_resolver(mut self, resolver: Arc<dyn ArgResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Build a rule from configuration; `claims` and `values` become resolvers.
    pub fn from_config(config: &RuleConfig) -> Self {
        let mut rule = Self {
            table: config.table.clone(),
            id: config.id.clone(),
            column: config.column.clone(),
            predicate: config.predicate.clone(),
            resolver: None,
        };
        if !config.claims.is_empty() {
            rule = rule.with_resolver(ClaimResolver::new(config.claims.iter().cloned()));
        } else if !config.values.is_empty() {
            rule = rule.with_resolver(StaticResolver::new(config.values.clone()));
        }
        rule
    }

    /// The protected table as configured.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Identifier used in audit decisions.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.table)
    }

    pub fn resolver(&self) -> Option<&Arc<dyn ArgResolver>> {
        self.resolver.as_ref()
    }

    /// The predicate template, synthesized in column mode.
    ///
    /// `None` when neither a predicate nor a column is set.
    pub fn template(&self) -> Option<Cow<'_, str>> {
        if let Some(predicate) = self.predicate.as_deref().filter(|p| !p.trim().is_empty()) {
            return Some(Cow::Borrowed(predicate));
        }
        self.column
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| Cow::Owned(column_template(c.trim())))
    }

    fn key(&self) -> String {
        normalize(&self.table)
    }
}

impl fmt::Debug for ScopeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeRule")
            .field("table", &self.table)
            .field("id", &self.id)
            .field("column", &self.column)
            .field("predicate", &self.predicate)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

fn normalize(table: &str) -> String {
    table
        .split('.')
        .map(|part| crate::tables::unquote(part.trim()).to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Rules keyed by table name, case-insensitive.
///
/// A qualified rule (`app.pipelines`) only matches that qualified name; an
/// unqualified rule (`pipelines`) matches the table in any schema. Adding a
/// second rule for the same table replaces the first.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ScopeRule>,
    index: HashMap<String, usize>,
}

/// Result of matching discovered tables against a [`RuleSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMatch {
    /// `(table index, rule index)` pairs in discovery order.
    pub matched: Vec<(usize, usize)>,
    /// Indexes of tables with no rule.
    pub unmatched: Vec<usize>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rule: ScopeRule) {
        let key = rule.key();
        match self.index.get(&key) {
            Some(&idx) => self.rules[idx] = rule,
            None => {
                self.index.insert(key, self.rules.len());
                self.rules.push(rule);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ScopeRule> {
        self.rules.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeRule> {
        self.rules.iter()
    }

    /// Index of the rule protecting `table`.
    pub fn lookup(&self, table: &TableRef) -> Option<usize> {
        self.index
            .get(&table.name)
            .or_else(|| self.index.get(table.unqualified()))
            .copied()
    }

    /// Split `tables` into ruled and unruled occurrences.
    pub fn match_tables(&self, tables: &[TableRef]) -> RuleMatch {
        let mut result = RuleMatch::default();
        for (t, table) in tables.iter().enumerate() {
            match self.lookup(table) {
                Some(r) => result.matched.push((t, r)),
                None => result.unmatched.push(t),
            }
        }
        result
    }
}

impl FromIterator<ScopeRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = ScopeRule>>(iter: I) -> Self {
        let mut set = RuleSet::new();
        for rule in iter {
            set.insert(rule);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(name: &str) -> TableRef {
        TableRef {
            name: name.to_string(),
            reference: name.to_string(),
            alias: None,
            scope: Some(0),
        }
    }

    #[test]
    fn test_template_precedence() {
        let rule = ScopeRule::column("pipelines", "user_id");
        assert_eq!(rule.template().unwrap(), "{{alias}}.user_id = {{param}}");

        let mut rule = ScopeRule::predicate("pipelines", "{{alias}}.org = {{param}}");
        rule.column = Some("user_id".to_string());
        assert_eq!(rule.template().unwrap(), "{{alias}}.org = {{param}}");

        let rule = ScopeRule::predicate("pipelines", "  ");
        assert!(rule.template().is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let rules: RuleSet = [ScopeRule::column("Pipelines", "user_id")].into_iter().collect();
        assert_eq!(rules.lookup(&table("pipelines")), Some(0));
        assert_eq!(rules.lookup(&table("app.pipelines")), Some(0));
        assert_eq!(rules.lookup(&table("runs")), None);
    }

    #[test]
    fn test_qualified_rule_only_matches_schema() {
        let rules: RuleSet = [ScopeRule::column("app.pipelines", "user_id")].into_iter().collect();
        assert_eq!(rules.lookup(&table("app.pipelines")), Some(0));
        assert_eq!(rules.lookup(&table("pipelines")), None);
        assert_eq!(rules.lookup(&table("other.pipelines")), None);
    }

    #[test]
    fn test_insert_replaces() {
        let mut rules = RuleSet::new();
        rules.insert(ScopeRule::column("pipelines", "user_id"));
        rules.insert(ScopeRule::column("PIPELINES", "owner_id").with_id("owner"));
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.get(0).unwrap().id(), "owner");
    }

    #[test]
    fn test_match_tables() {
        let rules: RuleSet = [ScopeRule::column("pipelines", "user_id")].into_iter().collect();
        let result = rules.match_tables(&[table("pipelines"), table("runs"), table("pipelines")]);
        assert_eq!(result.matched, vec![(0, 0), (2, 0)]);
        assert_eq!(result.unmatched, vec![1]);
    }

    #[test]
    fn test_from_config() {
        let config = RuleConfig {
            table: "runs".to_string(),
            id: Some("runs-by-org".to_string()),
            column: None,
            predicate: Some("{{alias}}.org_id = {{param}}".to_string()),
            claims: vec!["org_id".to_string()],
            values: vec![],
        };
        let rule = ScopeRule::from_config(&config);
        assert_eq!(rule.id(), "runs-by-org");
        assert!(rule.resolver().is_some());

        let config = RuleConfig {
            values: vec![json!(1)],
            claims: vec![],
            ..config
        };
        assert!(ScopeRule::from_config(&config).resolver().is_some());
    }
}
