//! # rowscope-audit
//!
//! Audit records for the scoping engine.
//!
//! Every statement the engine evaluates yields one [`ScopeDecision`]. The
//! decision is handed to an [`AuditSink`], which is fire-and-forget: sinks
//! return nothing, and their own failures stay inside the sink.
//!
//! ## Sinks
//!
//! | Sink | Behavior |
//! |------|----------|
//! | [`NullSink`] | Discards decisions |
//! | [`TracingSink`] | Emits one structured `tracing` event per decision |
//! | [`MemorySink`] | Keeps decisions in memory (tests, previews) |
//! | [`FilteredSink`] | Drops `passthrough` decisions before forwarding |
//! | [`ChannelSink`] | Queues decisions for a background [`JsonLinesWriter`] |

pub mod decision;
pub mod error;
pub mod sink;
pub mod writer;

pub use decision::{ScopeAction, ScopeDecision};
pub use error::AuditError;
pub use sink::{AuditSink, ChannelSink, FilteredSink, MemorySink, NullSink, TracingSink};
pub use writer::JsonLinesWriter;
