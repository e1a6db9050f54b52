//! `sqlx` executors for rowscope.
//!
//! Both executors implement [`rowscope_rls::Executor`], so they can be
//! wrapped in a [`rowscope_rls::HookedExecutor`] with a scope engine
//! attached. Arguments travel as JSON values and are bound by their JSON
//! type; rows come back as JSON objects keyed by column name.
//!
//! ```rust,ignore
//! let db = SqliteExecutor::connect("sqlite::memory:").await?;
//! let exec = HookedExecutor::new(db).with_hook(Arc::new(engine));
//! let rows = exec.fetch_all(&ScopeContext::for_subject(1), "SELECT * FROM pipelines", &[]).await?;
//! ```

use rowscope_rls::ExecError;

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;

fn db_error(e: sqlx::Error) -> ExecError {
    ExecError::Database(anyhow::Error::new(e))
}

fn number_arg(n: &serde_json::Number) -> anyhow::Result<f64> {
    n.as_f64()
        .ok_or_else(|| anyhow::anyhow!("Number {} cannot be bound as a float", n))
}
