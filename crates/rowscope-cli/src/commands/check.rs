//! `rowscope check` command implementation.
//!
//! Lints a scope configuration beyond what loading it enforces:
//! - Structural rule errors (blank table, no column or predicate)
//! - Template problems (unknown `{{...}}` tokens, missing `{{alias}}`)
//! - Argument sources that cannot fill the template's `{{param}}` slots
//! - Duplicate rules and risky bypass settings

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rowscope_core::{RuleConfig, ScopeConfig};
use rowscope_rls::ScopeRule;
use rowscope_rls::render::{bind_values, param_slots, render};
use serde_json::Value;

// ============================================================================
// Check Result Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: &'static str,
    pub message: String,
    /// Location within the file, e.g. `rules[2]`.
    pub location: Option<String>,
}

impl CheckFinding {
    fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            location: None,
        }
    }

    fn error(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn add(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    /// Print findings grouped by severity, most severe first.
    pub fn print_summary(&self) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(b.category)));

        for finding in &findings {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            println!(
                "  {:<5} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        println!();
        println!("{}", "=".repeat(60));
        let (errors, warnings) = (self.count(Severity::Error), self.count(Severity::Warning));
        if errors == 0 && warnings == 0 {
            println!("All checks passed!");
        } else {
            println!("Summary: {} error(s), {} warning(s)", errors, warnings);
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

/// Run every check against a parsed configuration.
pub fn check_config(config: &ScopeConfig) -> CheckResults {
    let mut results = CheckResults::default();

    if config.rules.is_empty() {
        results.add(CheckFinding::warning("rules", "no rules configured; every statement passes through"));
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (idx, rule) in config.rules.iter().enumerate() {
        let location = format!("rules[{}]", idx);

        if let Err(message) = rule.validate() {
            results.add(CheckFinding::error("rules", message).at(&location));
            continue;
        }

        let key = rule.table.trim().to_lowercase();
        if let Some(first) = seen.insert(key, idx) {
            results.add(
                CheckFinding::warning(
                    "rules",
                    format!("table '{}' is also ruled by rules[{}]; this rule replaces it", rule.table, first),
                )
                .at(&location),
            );
        }

        for finding in check_template(rule) {
            results.add(finding.at(&location));
        }
    }

    if config.bypass.allow_trusted && !config.bypass.require_token {
        results.add(
            CheckFinding::warning(
                "bypass",
                "trusted callers bypass scoping without the token in the query",
            )
            .at("bypass"),
        );
    }
    if config.modes.strict_all_tables && !config.modes.strict_mode {
        results.add(
            CheckFinding::info(
                "modes",
                "strict_all_tables without strict_mode still passes statements whose arguments cannot be resolved",
            )
            .at("modes"),
        );
    }

    results
}

fn check_template(rule: &RuleConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    let scope_rule = ScopeRule::from_config(rule);
    let Some(template) = scope_rule.template() else {
        return findings;
    };

    if rule.predicate.is_some() && rule.column.is_some() {
        findings.push(CheckFinding::info("template", "both predicate and column set; column is ignored"));
    }

    let slots = param_slots(&template);
    let rendered = render(&template, "t", &vec![Value::Null; slots]);
    for token in &rendered.unknown_tokens {
        findings.push(CheckFinding::warning(
            "template",
            format!("unknown token {} is passed through verbatim", token),
        ));
    }
    if !template.contains("{{alias}}") {
        findings.push(CheckFinding::warning(
            "template",
            "predicate does not reference {{alias}}; columns may be ambiguous in joins",
        ));
    }

    let (source, supplied) = if !rule.claims.is_empty() {
        ("claims", rule.claims.len())
    } else {
        ("values", rule.values.len())
    };
    if slots == 0 && supplied > 0 {
        findings.push(CheckFinding::warning(
            "resolver",
            format!("{} are configured but the template has no {{{{param}}}} slot", source),
        ));
    } else if supplied > 0 {
        if let Err(mismatch) = bind_values(slots, vec![Value::Null; supplied]) {
            findings.push(CheckFinding::error(
                "resolver",
                format!("{}: {}", source, mismatch),
            ));
        }
    }

    findings
}

// ============================================================================
// Runner
// ============================================================================

pub fn run(config_path: &Path) -> Result<()> {
    println!("Checking {}...", config_path.display());
    println!();

    // Parse without validation so structural problems surface as findings.
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let config: ScopeConfig =
        serde_yaml::from_str(&content).context("Failed to parse configuration")?;

    let results = check_config(&config);
    tracing::info!(findings = results.findings.len(), "Checked scope configuration");
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!("configuration has errors that must be fixed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings(yaml: &str) -> Vec<(Severity, &'static str)> {
        let config: ScopeConfig = serde_yaml::from_str(yaml).unwrap();
        check_config(&config)
            .findings
            .into_iter()
            .map(|f| (f.severity, f.category))
            .collect()
    }

    #[test]
    fn test_clean_config() {
        let yaml = r#"
rules:
  - table: pipelines
    column: user_id
  - table: documents
    predicate: "{{alias}}.org_id = {{param}} AND {{alias}}.team_id = {{param}}"
    claims: [org_id, team_id]
"#;
        assert!(findings(yaml).is_empty());
    }

    #[test]
    fn test_rule_without_column_or_predicate() {
        let yaml = r#"
rules:
  - table: pipelines
"#;
        assert_eq!(findings(yaml), vec![(Severity::Error, "rules")]);
    }

    #[test]
    fn test_template_findings() {
        let yaml = r#"
rules:
  - table: documents
    predicate: "org_id = {{param}} AND {{tenant}} IS NOT NULL"
"#;
        assert_eq!(
            findings(yaml),
            vec![(Severity::Warning, "template"), (Severity::Warning, "template")]
        );
    }

    #[test]
    fn test_argument_count_mismatch() {
        let yaml = r#"
rules:
  - table: documents
    predicate: "{{alias}}.a = {{param}} AND {{alias}}.b = {{param}} AND {{alias}}.c = {{param}}"
    values: [1, 2]
"#;
        assert_eq!(findings(yaml), vec![(Severity::Error, "resolver")]);
    }

    #[test]
    fn test_duplicates_and_bypass() {
        let yaml = r#"
bypass:
  allow_trusted: true
  require_token: false
rules:
  - table: pipelines
    column: user_id
  - table: Pipelines
    column: owner_id
"#;
        assert_eq!(
            findings(yaml),
            vec![(Severity::Warning, "rules"), (Severity::Warning, "bypass")]
        );
    }

    #[test]
    fn test_run_fails_on_errors() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"rules:\n  - table: pipelines\n").unwrap();
        assert!(run(file.path()).is_err());
    }
}
