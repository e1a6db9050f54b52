//! # rowscope-rls
//!
//! Application-level row scoping for SQL.
//!
//! This crate provides functionality to:
//! - Split and classify SQL statements without a full parser
//! - Discover tables and aliases, including subqueries, CTE bodies and
//!   set-operation arms
//! - Inject per-table scoping predicates resolved from the caller's identity
//! - Enforce fail-closed policy with deterministic deny codes
//!
//! ## How It Works
//!
//! Given a rule `{ table: pipelines, column: user_id }` and a caller whose
//! subject is `1`:
//!
//! **Before (from the application):**
//! ```sql
//! SELECT * FROM pipelines WHERE name LIKE ?
//! ```
//!
//! **After (to the database):**
//! ```sql
//! SELECT * FROM pipelines WHERE name LIKE ? AND (pipelines.user_id = ?)
//! ```
//!
//! with arguments `["%Build%", 1]`.
//!
//! ## Supported Statements
//!
//! | Statement | Behavior |
//! |-----------|----------|
//! | `SELECT`  | `WHERE`/`AND` predicate per ruled table, in every select scope |
//! | `WITH ... SELECT` | CTE bodies and the final select scoped independently |
//! | `UPDATE`  | Target (and `FROM` tables) scoped in the `WHERE` clause |
//! | `DELETE`  | Target (and `USING` tables) scoped in the `WHERE` clause |
//! | anything else | Passthrough, or rejected by the enforcement modes |

pub mod bypass;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod hook;
pub mod lexer;
pub mod policy;
pub mod render;
pub mod resolver;
pub mod rewrite;
pub mod rules;
pub mod tables;

pub use engine::{Evaluation, ScopeEngine, ScopeEngineBuilder, ScopedQuery};
pub use error::{BuildError, ExecError, HookError, ScopeError, deny_code_from_error};
pub use hook::{Executor, HookedExecutor, QueryCall, QueryHook, Row};
pub use resolver::{
    ArgResolver, ClaimResolver, ContextResolver, FnResolver, ResolveError, StaticResolver,
};
pub use rules::{RuleSet, ScopeRule};
