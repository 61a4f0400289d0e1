//! Write-ahead log for raw inbox payloads: every payload is recorded
//! before normalization runs, so a crash between pop and journal append
//! still leaves forensic evidence of what arrived.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct RawInboxLog {
    path: PathBuf,
}

impl RawInboxLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, payload: &Value) -> Result<(), WalError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = serde_json::to_string(&serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "payload": payload,
        }))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn record_appends_jsonl_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let wal = RawInboxLog::new(dir.path().join("inbox_dump.jsonl"));
        wal.record(&json!({"event_type": "NewInboxMessage"})).await?;
        wal.record(&json!({"event_type": "AlarmClock"})).await?;

        let raw = tokio::fs::read_to_string(wal.path()).await?;
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0])?;
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(parsed["payload"]["event_type"], "NewInboxMessage");
        Ok(())
    }
}
