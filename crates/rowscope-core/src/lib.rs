//! # rowscope-core
//!
//! Types shared across the rowscope crates:
//!
//! - [`DenyCode`]: the stable vocabulary attached to rejected statements
//! - [`Dialect`]: placeholder style selected from the driver name
//! - [`ScopeContext`]: caller identity and trusted-bypass marker for one call
//! - [`StatementKind`]: statement shape reported by the classifier
//! - [`config`]: YAML configuration for rules and enforcement modes

pub mod config;
pub mod context;
pub mod deny;
pub mod dialect;
pub mod statement;

pub use config::{
    BypassConfig, ConfigError, EnforcementModes, PartialFailure, RuleConfig, ScopeConfig,
};
pub use context::{Identity, ScopeContext, TrustedBypass};
pub use deny::DenyCode;
pub use dialect::Dialect;
pub use statement::StatementKind;
