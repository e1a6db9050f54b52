//! `rowscope explain` command implementation.
//!
//! Evaluates a query against a scope configuration for a synthetic caller
//! and prints the rewritten SQL, the final arguments and the per-statement
//! decisions as JSON. Nothing is executed and nothing is audited.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use rowscope_audit::NullSink;
use rowscope_core::{Dialect, Identity, ScopeConfig, ScopeContext, TrustedBypass};
use rowscope_rls::ScopeEngineBuilder;
use serde_json::{Value, json};

#[derive(Args, Debug, Clone)]
pub struct ExplainArgs {
    /// Path to the scope configuration
    #[arg(long, default_value = "scope.yaml")]
    pub config: PathBuf,

    /// Driver name selecting the placeholder style (overrides the config)
    #[arg(long)]
    pub dialect: Option<String>,

    /// Identity subject; parsed as JSON when possible (`1`, `"u-1"`)
    #[arg(long)]
    pub subject: Option<String>,

    /// Identity claim as `name=value`, repeatable
    #[arg(long = "claim")]
    pub claims: Vec<String>,

    /// Trusted bypass marker as `actor:reason`
    #[arg(long)]
    pub trusted: Option<String>,

    /// Query argument as JSON, repeatable, in placeholder order
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Resolution deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// The SQL to scope
    pub sql: String,
}

/// Parse a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_context(args: &ExplainArgs) -> Result<ScopeContext> {
    let mut ctx = ScopeContext::new();

    if let Some(subject) = &args.subject {
        let mut identity = Identity::new(parse_value(subject));
        for claim in &args.claims {
            let (name, value) = claim
                .split_once('=')
                .with_context(|| format!("Claim '{}' must be written as name=value", claim))?;
            identity = identity.with_claim(name.trim(), parse_value(value));
        }
        ctx = ctx.with_identity(identity);
    } else if !args.claims.is_empty() {
        anyhow::bail!("--claim requires --subject");
    }

    if let Some(trusted) = &args.trusted {
        let (actor, reason) = trusted.split_once(':').unwrap_or((trusted.as_str(), ""));
        ctx = ctx.with_trusted_bypass(TrustedBypass::new(actor.trim(), reason.trim()));
    }

    if let Some(ms) = args.timeout_ms {
        ctx = ctx.with_deadline(Instant::now() + Duration::from_millis(ms));
    }

    Ok(ctx)
}

/// Evaluate the query and build the JSON report.
pub async fn explain(args: &ExplainArgs, config: &ScopeConfig) -> Result<Value> {
    let engine = ScopeEngineBuilder::from_config(config)?
        .audit_sink(NullSink)
        .build()?;
    let dialect = args
        .dialect
        .as_deref()
        .map(Dialect::from_driver_name)
        .unwrap_or_else(|| engine.dialect());
    let ctx = build_context(args)?;
    let query_args: Vec<Value> = args.args.iter().map(|a| parse_value(a)).collect();

    let evaluation = engine.evaluate(dialect, &ctx, &args.sql, query_args).await;
    let rejection = evaluation.rejection.as_ref().map(|e| {
        json!({
            "code": e.code.as_str(),
            "http_status": e.code.http_status(),
            "statement_index": e.statement_index,
            "message": e.message,
        })
    });

    Ok(json!({
        "dialect": dialect.to_string(),
        "sql": evaluation.sql,
        "args": evaluation.args,
        "decisions": serde_json::to_value(&evaluation.decisions)?,
        "rejection": rejection,
    }))
}

pub async fn run(args: ExplainArgs) -> Result<()> {
    let config = ScopeConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    tracing::info!(rules = config.rules.len(), config = %args.config.display(), "Loaded scope configuration");

    let report = explain(&args, &config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(code) = report["rejection"]["code"].as_str() {
        anyhow::bail!("query rejected [{}]", code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
modes:
  strict_mode: true
bypass:
  allow_trusted: true
rules:
  - table: pipelines
    column: user_id
  - table: documents
    predicate: "{{alias}}.org_id = {{param}}"
    claims: [org_id]
"#;

    fn args(sql: &str) -> ExplainArgs {
        ExplainArgs {
            config: PathBuf::from("scope.yaml"),
            dialect: None,
            subject: Some("1".to_string()),
            claims: vec![],
            trusted: None,
            args: vec![],
            timeout_ms: None,
            sql: sql.to_string(),
        }
    }

    fn config() -> ScopeConfig {
        ScopeConfig::from_yaml(CONFIG).unwrap()
    }

    #[tokio::test]
    async fn test_explain_scoped_query() {
        let mut a = args("SELECT * FROM documents d WHERE d.title = $1");
        a.dialect = Some("postgres".to_string());
        a.claims = vec!["org_id=42".to_string()];
        a.args = vec!["\"q3\"".to_string()];

        let report = explain(&a, &config()).await.unwrap();
        assert_eq!(report["dialect"], json!("dollar"));
        assert_eq!(
            report["sql"],
            json!("SELECT * FROM documents d WHERE d.title = $1 AND (d.org_id = $2)")
        );
        assert_eq!(report["args"], json!(["q3", 42]));
        assert_eq!(report["decisions"][0]["action"], json!("scoped"));
        assert!(report["rejection"].is_null());
    }

    #[tokio::test]
    async fn test_explain_rejection() {
        let mut a = args("SELECT * FROM pipelines");
        a.subject = None;
        let report = explain(&a, &config()).await.unwrap();
        assert_eq!(report["rejection"]["code"], json!("missing_context"));
        assert_eq!(report["sql"], json!("SELECT * FROM pipelines"));
    }

    #[tokio::test]
    async fn test_explain_trusted_bypass() {
        let mut a = args("/* scope:bypass */ SELECT * FROM pipelines");
        a.trusted = Some("reindex-job:nightly rebuild".to_string());
        let report = explain(&a, &config()).await.unwrap();
        assert_eq!(report["decisions"][0]["action"], json!("bypassed"));
        assert_eq!(report["decisions"][0]["bypass_actor"], json!("reindex-job"));
    }

    #[test]
    fn test_claims_need_subject() {
        let mut a = args("SELECT 1");
        a.subject = None;
        a.claims = vec!["org_id=1".to_string()];
        assert!(build_context(&a).is_err());

        let mut a = args("SELECT 1");
        a.claims = vec!["org_id".to_string()];
        assert!(build_context(&a).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1"), json!(1));
        assert_eq!(parse_value("\"1\""), json!("1"));
        assert_eq!(parse_value("alice"), json!("alice"));
    }

    #[tokio::test]
    async fn test_run_reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let mut a = args("SELECT * FROM pipelines");
        a.config = file.path().to_path_buf();
        run(a).await.unwrap();
    }
}
