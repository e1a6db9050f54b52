//! Configuration types for rowscope.
//!
//! A single `scope.yaml` describes the rule set and the enforcement modes:
//!
//! ```yaml
//! dialect: postgres
//! modes:
//!   strict_mode: true
//!   reject_unknown_shapes: true
//! bypass:
//!   allow_trusted: true
//!   require_token: true
//! rules:
//!   - table: pipelines
//!     column: user_id
//!   - table: documents
//!     predicate: "{{alias}}.org_id = {{param}}"
//!     claims: [org_id]
//! ```

pub mod bypass;
pub mod modes;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use bypass::{BypassConfig, DEFAULT_BYPASS_TOKEN};
pub use modes::{EnforcementModes, PartialFailure};
pub use rules::RuleConfig;

/// Complete scope engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Driver name used to pick the placeholder dialect (`postgres`, `mysql`, ...).
    #[serde(default)]
    pub dialect: Option<String>,

    /// Claim read by the default resolver. When unset, the identity subject is used.
    #[serde(default)]
    pub identity_claim: Option<String>,

    /// Enforcement flags.
    #[serde(default)]
    pub modes: EnforcementModes,

    /// Trusted bypass settings.
    #[serde(default)]
    pub bypass: BypassConfig,

    /// Scope rules, in registration order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScopeConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ScopeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (idx, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| ConfigError::Config(format!("rule #{}: {}", idx + 1, e)))?;
        }
        if self.bypass.token.trim().is_empty() {
            return Err(ConfigError::Config(
                "bypass.token must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Find the rule configured for a table (case-insensitive).
    pub fn rule_for(&self, table: &str) -> Option<&RuleConfig> {
        self.rules
            .iter()
            .find(|r| r.table.eq_ignore_ascii_case(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
dialect: postgres
identity_claim: user_id
modes:
  strict_mode: true
  strict_all_tables: true
  partial_failure: reject
bypass:
  allow_trusted: true
  require_reason: true
rules:
  - table: pipelines
    column: user_id
  - table: documents
    id: documents-by-org
    predicate: "{{alias}}.org_id = {{param}}"
    claims: [org_id]
"#;

    #[test]
    fn test_parse_sample() {
        let config = ScopeConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.dialect.as_deref(), Some("postgres"));
        assert_eq!(config.identity_claim.as_deref(), Some("user_id"));
        assert!(config.modes.strict_mode);
        assert!(config.modes.strict_all_tables);
        assert!(!config.modes.reject_unknown_shapes);
        assert_eq!(config.modes.partial_failure, PartialFailure::Reject);
        assert!(config.bypass.allow_trusted);
        assert!(config.bypass.require_token);
        assert_eq!(config.bypass.token, DEFAULT_BYPASS_TOKEN);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rule_for("DOCUMENTS").unwrap().rule_id(), "documents-by-org");
        assert_eq!(config.rule_for("pipelines").unwrap().rule_id(), "pipelines");
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = ScopeConfig::from_yaml("{}").unwrap();
        assert!(config.rules.is_empty());
        assert!(!config.modes.strict_mode);
        assert!(!config.bypass.allow_trusted);
        assert_eq!(config.modes.partial_failure, PartialFailure::ScopeResolved);
    }

    #[test]
    fn test_rule_without_column_or_predicate_is_rejected() {
        let err = ScopeConfig::from_yaml("rules:\n  - table: pipelines\n").unwrap_err();
        assert!(err.to_string().contains("rule #1"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ScopeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rules.len(), 2);
    }
}
