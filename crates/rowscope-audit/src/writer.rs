//! Background JSON Lines writer.
//!
//! The engine calls sinks on the query path, so file I/O happens on a
//! separate task fed by a [`ChannelSink`].

use crate::decision::ScopeDecision;
use crate::error::AuditError;
use crate::sink::ChannelSink;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Appends decisions to a file, one JSON object per line.
pub struct JsonLinesWriter {
    path: PathBuf,
    file: File,
}

impl JsonLinesWriter {
    /// Open (or create) the audit file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    /// Start the writer task.
    ///
    /// Returns the sink to hand to the engine and the task handle. The task
    /// finishes once every clone of the sink is dropped, yielding the number
    /// of decisions written.
    pub fn spawn(self) -> (ChannelSink, JoinHandle<Result<u64, AuditError>>) {
        let (sink, rx) = ChannelSink::new();
        let handle = tokio::spawn(self.run(rx));
        (sink, handle)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ScopeDecision>) -> Result<u64, AuditError> {
        let mut written = 0u64;
        while let Some(decision) = rx.recv().await {
            match self.write(&decision).await {
                Ok(()) => written += 1,
                Err(e) => tracing::error!(
                    path = %self.path.display(),
                    decision_id = %decision.decision_id,
                    error = %e,
                    "Failed to write scope decision"
                ),
            }
        }
        self.file.flush().await?;
        Ok(written)
    }

    async fn write(&mut self, decision: &ScopeDecision) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(decision)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ScopeAction;
    use crate::sink::AuditSink;
    use rowscope_core::{DenyCode, StatementKind};

    #[tokio::test]
    async fn test_writes_one_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("scope.log");

        let writer = JsonLinesWriter::open(&path).await.unwrap();
        let (sink, handle) = writer.spawn();
        sink.record(ScopeDecision::scoped(
            0,
            StatementKind::Select,
            vec!["pipelines".to_string()],
            vec!["pipelines".to_string()],
        ));
        sink.record(ScopeDecision::rejected(
            0,
            StatementKind::Select,
            DenyCode::MissingContext,
            "no identity",
        ));
        drop(sink);

        assert_eq!(handle.await.unwrap().unwrap(), 2);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let decisions: Vec<ScopeDecision> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, ScopeAction::Scoped);
        assert_eq!(decisions[1].reason_code, Some(DenyCode::MissingContext));
    }
}
