//! Declarative scope rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scope rule as written in configuration.
///
/// Exactly one argument source applies: `claims` (named identity claims),
/// `values` (fixed values), or neither (the engine's default resolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Table the rule protects, optionally schema-qualified.
    pub table: String,

    /// Identifier reported in audit decisions. Defaults to the table name.
    #[serde(default)]
    pub id: Option<String>,

    /// Shorthand: `{{alias}}.<column> = {{param}}`.
    #[serde(default)]
    pub column: Option<String>,

    /// Explicit predicate template. Takes precedence over `column`.
    #[serde(default)]
    pub predicate: Option<String>,

    /// Identity claims supplying the predicate arguments, in order.
    #[serde(default)]
    pub claims: Vec<String>,

    /// Fixed predicate arguments.
    #[serde(default)]
    pub values: Vec<Value>,
}

impl RuleConfig {
    /// The identifier reported for this rule.
    pub fn rule_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.table)
    }

    /// Check the rule on its own; the message omits the rule position.
    pub fn validate(&self) -> Result<(), String> {
        if self.table.trim().is_empty() {
            return Err("table must not be blank".to_string());
        }
        let has_predicate = self.predicate.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_column = self.column.as_deref().is_some_and(|c| !c.trim().is_empty());
        if !has_predicate && !has_column {
            return Err(format!(
                "table '{}' needs either a column or a predicate",
                self.table
            ));
        }
        if !self.claims.is_empty() && !self.values.is_empty() {
            return Err(format!(
                "table '{}' sets both claims and values",
                self.table
            ));
        }
        Ok(())
    }
}
