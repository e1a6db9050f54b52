//! Argument resolvers.
//!
//! A resolver turns the request [`ScopeContext`] into the values bound to a
//! rule's `{{param}}` slots. Resolvers are async so they can consult a
//! session store or another service; the engine calls each one at most once
//! per rule per invocation and honors the context deadline.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rowscope_core::{DenyCode, ScopeContext};
use serde_json::Value;
use thiserror::Error;

/// Why a resolver produced no values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The context carries no identity, or not the part this resolver reads.
    #[error("missing scope context: {0}")]
    MissingContext(String),

    /// No resolver is configured, or it yielded nothing usable.
    #[error("no usable resolver value: {0}")]
    Unavailable(String),

    /// The resolver itself failed.
    #[error("resolver failed: {0}")]
    Failed(String),

    #[error("context deadline elapsed {0}")]
    DeadlineElapsed(&'static str),
}

impl ResolveError {
    pub fn deny_code(&self) -> DenyCode {
        match self {
            Self::MissingContext(_) => DenyCode::MissingContext,
            Self::Unavailable(_) => DenyCode::ResolverRequired,
            Self::Failed(_) | Self::DeadlineElapsed(_) => DenyCode::ResolverFailed,
        }
    }
}

/// Produces predicate arguments from the request context.
#[async_trait]
pub trait ArgResolver: Send + Sync {
    async fn resolve(&self, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError>;
}

#[async_trait]
impl<R: ArgResolver + ?Sized> ArgResolver for Arc<R> {
    async fn resolve(&self, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        (**self).resolve(ctx).await
    }
}

/// Reads the identity subject, or a single claim when one is named.
///
/// This is the default resolver built from `identity_claim` in config.
#[derive(Debug, Clone, Default)]
pub struct ContextResolver {
    claim: Option<String>,
}

impl ContextResolver {
    /// Resolve to the identity subject.
    pub fn subject() -> Self {
        Self { claim: None }
    }

    /// Resolve to the named claim.
    pub fn claim(name: impl Into<String>) -> Self {
        Self {
            claim: Some(name.into()),
        }
    }
}

#[async_trait]
impl ArgResolver for ContextResolver {
    async fn resolve(&self, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        let identity = ctx
            .identity()
            .ok_or_else(|| ResolveError::MissingContext("no identity in context".to_string()))?;
        let value = match &self.claim {
            Some(name) => identity
                .claim(name)
                .ok_or_else(|| ResolveError::MissingContext(format!("claim '{}' not present", name)))?,
            None => identity
                .subject()
                .ok_or_else(|| ResolveError::MissingContext("identity has no subject".to_string()))?,
        };
        Ok(vec![value.clone()])
    }
}

/// Reads several claims, one value per slot in order.
#[derive(Debug, Clone)]
pub struct ClaimResolver {
    claims: Vec<String>,
}

impl ClaimResolver {
    pub fn new<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            claims: claims.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ArgResolver for ClaimResolver {
    async fn resolve(&self, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        let identity = ctx
            .identity()
            .ok_or_else(|| ResolveError::MissingContext("no identity in context".to_string()))?;
        self.claims
            .iter()
            .map(|name| {
                identity
                    .claim(name)
                    .cloned()
                    .ok_or_else(|| ResolveError::MissingContext(format!("claim '{}' not present", name)))
            })
            .collect()
    }
}

/// Fixed values, independent of the context.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    values: Vec<Value>,
}

impl StaticResolver {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl ArgResolver for StaticResolver {
    async fn resolve(&self, _ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        if self.values.is_empty() {
            return Err(ResolveError::Unavailable("static resolver has no values".to_string()));
        }
        Ok(self.values.clone())
    }
}

type ResolveFn = dyn Fn(ScopeContext) -> BoxFuture<'static, Result<Vec<Value>, ResolveError>> + Send + Sync;

/// Wraps an async closure.
///
/// ```rust,ignore
/// let resolver = FnResolver::new(|ctx| async move {
///     let tenant = lookup_tenant(&ctx).await?;
///     Ok(vec![tenant])
/// });
/// ```
#[derive(Clone)]
pub struct FnResolver {
    f: Arc<ResolveFn>,
}

impl FnResolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ScopeContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Value>, ResolveError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

impl fmt::Debug for FnResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl ArgResolver for FnResolver {
    async fn resolve(&self, ctx: &ScopeContext) -> Result<Vec<Value>, ResolveError> {
        (self.f)(ctx.clone()).await
    }
}

/// Run `resolver` under the context deadline, if any.
pub async fn resolve_with_deadline(
    resolver: &dyn ArgResolver,
    ctx: &ScopeContext,
) -> Result<Vec<Value>, ResolveError> {
    let Some(deadline) = ctx.deadline() else {
        return resolver.resolve(ctx).await;
    };
    if std::time::Instant::now() >= deadline {
        return Err(ResolveError::DeadlineElapsed("before resolution"));
    }
    let deadline = tokio::time::Instant::from_std(deadline);
    match tokio::time::timeout_at(deadline, resolver.resolve(ctx)).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::DeadlineElapsed("during resolution")),
    }
}
