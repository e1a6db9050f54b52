//! CLI command implementations for rowscope.

pub mod check;
pub mod explain;
