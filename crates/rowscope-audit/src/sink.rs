//! Audit sinks.

use crate::decision::{ScopeAction, ScopeDecision};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Receives one decision per evaluated statement.
///
/// Implementations must not block for long and must swallow their own
/// failures: nothing a sink does can affect the query path.
pub trait AuditSink: Send + Sync {
    fn record(&self, decision: ScopeDecision);
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, decision: ScopeDecision) {
        (**self).record(decision)
    }
}

/// Discards every decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn record(&self, _decision: ScopeDecision) {}
}

/// Emits decisions as structured `tracing` events.
///
/// Rejections are logged at `warn`, everything else at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, decision: ScopeDecision) {
        let tables = decision.matched_tables.join(",");
        let rules = decision.applied_rules.join(",");
        match decision.action {
            ScopeAction::Rejected => tracing::warn!(
                decision_id = %decision.decision_id,
                action = %decision.action,
                statement = decision.statement_index,
                kind = %decision.statement_kind,
                code = decision.reason_code.map(|c| c.as_str()).unwrap_or(""),
                message = decision.message.as_deref().unwrap_or(""),
                "Scope decision"
            ),
            _ => tracing::debug!(
                decision_id = %decision.decision_id,
                action = %decision.action,
                statement = decision.statement_index,
                kind = %decision.statement_kind,
                tables = %tables,
                rules = %rules,
                "Scope decision"
            ),
        }
    }
}

/// Keeps decisions in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    decisions: Arc<Mutex<Vec<ScopeDecision>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the decisions recorded so far.
    pub fn decisions(&self) -> Vec<ScopeDecision> {
        match self.decisions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The most recent decision.
    pub fn last(&self) -> Option<ScopeDecision> {
        self.decisions().pop()
    }

    pub fn len(&self) -> usize {
        self.decisions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.decisions.lock() {
            guard.clear();
        }
    }
}

impl AuditSink for MemorySink {
    fn record(&self, decision: ScopeDecision) {
        match self.decisions.lock() {
            Ok(mut guard) => guard.push(decision),
            Err(poisoned) => poisoned.into_inner().push(decision),
        }
    }
}

/// Forwards everything except `passthrough` decisions.
pub struct FilteredSink<S> {
    inner: S,
}

impl<S: AuditSink> FilteredSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: AuditSink> AuditSink for FilteredSink<S> {
    fn record(&self, decision: ScopeDecision) {
        if decision.action != ScopeAction::Passthrough {
            self.inner.record(decision);
        }
    }
}

/// Queues decisions for a background consumer without blocking.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ScopeDecision>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScopeDecision>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelSink {
    fn record(&self, decision: ScopeDecision) {
        if let Err(e) = self.tx.send(decision) {
            tracing::warn!(
                decision_id = %e.0.decision_id,
                "Audit channel closed; dropping scope decision"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowscope_core::{DenyCode, StatementKind};

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.record(ScopeDecision::passthrough(0, StatementKind::Select));
        sink.record(ScopeDecision::rejected(
            1,
            StatementKind::Unknown,
            DenyCode::UnknownShape,
            "cannot classify",
        ));

        let decisions = sink.decisions();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, ScopeAction::Passthrough);
        assert_eq!(sink.last().unwrap().reason_code, Some(DenyCode::UnknownShape));
    }

    #[test]
    fn test_filtered_sink_drops_passthrough() {
        let memory = MemorySink::new();
        let sink = FilteredSink::new(memory.clone());
        sink.record(ScopeDecision::passthrough(0, StatementKind::Select));
        sink.record(ScopeDecision::bypassed(1, StatementKind::Select, "job"));

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.last().unwrap().action, ScopeAction::Bypassed);
    }

    #[tokio::test]
    async fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.record(ScopeDecision::passthrough(0, StatementKind::Select));
    }

    #[test]
    fn test_tracing_sink_accepts_all_actions() {
        let sink = TracingSink;
        sink.record(ScopeDecision::passthrough(0, StatementKind::Select));
        sink.record(ScopeDecision::rejected(
            0,
            StatementKind::Select,
            DenyCode::MissingRule,
            "no rule for audit_log",
        ));
    }
}
