//! Trusted bypass configuration.

use serde::{Deserialize, Serialize};

/// Literal searched for in the query text when a bypass is requested.
pub const DEFAULT_BYPASS_TOKEN: &str = "/* scope:bypass */";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassConfig {
    /// Whether trusted callers may bypass scoping at all.
    #[serde(default)]
    pub allow_trusted: bool,

    /// A trusted bypass also needs the token in the query text.
    #[serde(default = "default_true")]
    pub require_token: bool,

    /// A trusted bypass must carry a non-blank reason.
    #[serde(default)]
    pub require_reason: bool,

    /// The in-query bypass token.
    #[serde(default = "default_token")]
    pub token: String,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            allow_trusted: false,
            require_token: default_true(),
            require_reason: false,
            token: default_token(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_token() -> String {
    DEFAULT_BYPASS_TOKEN.to_string()
}
