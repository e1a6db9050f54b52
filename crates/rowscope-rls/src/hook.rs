//! Query hook contract and the executor wrapper that runs hooks.
//!
//! A [`QueryHook`] sees every call before it reaches the database and may
//! rewrite it or abort it. [`HookedExecutor`] wraps any [`Executor`] and
//! runs its hooks in order; an error from `before` aborts the call without
//! touching the database.

use std::sync::Arc;

use async_trait::async_trait;
use rowscope_core::{Dialect, ScopeContext};
use serde_json::{Map, Value};

use crate::error::{ExecError, HookError};

/// One row, column name to value.
pub type Row = Map<String, Value>;

/// A query on its way to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCall {
    pub query: String,
    pub args: Vec<Value>,
    pub dialect: Dialect,
}

impl QueryCall {
    pub fn new(query: impl Into<String>, args: Vec<Value>, dialect: Dialect) -> Self {
        Self {
            query: query.into(),
            args,
            dialect,
        }
    }
}

#[async_trait]
pub trait QueryHook: Send + Sync {
    /// Inspect or rewrite `call`. An error aborts the call.
    async fn before(&self, ctx: &ScopeContext, call: &mut QueryCall) -> Result<(), HookError>;

    /// Called after the database returned successfully.
    async fn after(&self, _ctx: &ScopeContext, _call: &QueryCall) {}

    /// Called when the database call failed.
    async fn on_error(&self, _ctx: &ScopeContext, _call: &QueryCall, _error: &ExecError) {}
}

#[async_trait]
impl<H: QueryHook + ?Sized> QueryHook for Arc<H> {
    async fn before(&self, ctx: &ScopeContext, call: &mut QueryCall) -> Result<(), HookError> {
        (**self).before(ctx, call).await
    }

    async fn after(&self, ctx: &ScopeContext, call: &QueryCall) {
        (**self).after(ctx, call).await
    }

    async fn on_error(&self, ctx: &ScopeContext, call: &QueryCall, error: &ExecError) {
        (**self).on_error(ctx, call, error).await
    }
}

/// A database handle that runs SQL with JSON-valued arguments.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Driver name, used to pick the placeholder dialect.
    fn driver_name(&self) -> &str;

    /// Run a statement; returns rows affected.
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, ExecError>;

    /// Run a query and collect its rows.
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, ExecError>;
}

/// Runs hooks around every call to an inner [`Executor`].
pub struct HookedExecutor<E> {
    inner: E,
    hooks: Vec<Arc<dyn QueryHook>>,
    dialect: Dialect,
}

impl<E: Executor> HookedExecutor<E> {
    pub fn new(inner: E) -> Self {
        let dialect = Dialect::from_driver_name(inner.driver_name());
        Self {
            inner,
            hooks: Vec::new(),
            dialect,
        }
    }

    /// Add a hook; hooks run in the order they were added.
    pub fn with_hook(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    async fn prepare(&self, ctx: &ScopeContext, sql: &str, args: &[Value]) -> Result<QueryCall, ExecError> {
        let mut call = QueryCall::new(sql, args.to_vec(), self.dialect);
        for hook in &self.hooks {
            hook.before(ctx, &mut call).await?;
        }
        Ok(call)
    }

    async fn finish<T>(&self, ctx: &ScopeContext, call: &QueryCall, result: Result<T, ExecError>) -> Result<T, ExecError> {
        match &result {
            Ok(_) => {
                for hook in &self.hooks {
                    hook.after(ctx, call).await;
                }
            }
            Err(e) => {
                for hook in &self.hooks {
                    hook.on_error(ctx, call, e).await;
                }
            }
        }
        result
    }

    pub async fn execute(&self, ctx: &ScopeContext, sql: &str, args: &[Value]) -> Result<u64, ExecError> {
        let call = self.prepare(ctx, sql, args).await?;
        let result = self.inner.execute(&call.query, &call.args).await;
        self.finish(ctx, &call, result).await
    }

    pub async fn fetch_all(&self, ctx: &ScopeContext, sql: &str, args: &[Value]) -> Result<Vec<Row>, ExecError> {
        let call = self.prepare(ctx, sql, args).await?;
        let result = self.inner.fetch_all(&call.query, &call.args).await;
        self.finish(ctx, &call, result).await
    }
}
