//! Human-readable archive of normalized inbox traffic, distinct from the
//! raw-payload write-ahead log the normalizer keeps for forensics — this one
//! records what was actually understood, and feeds the context assembler's
//! changelog tail.

use std::path::PathBuf;

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use agent_normalizer::Normalized;

pub struct CommunicationsLog {
    path: PathBuf,
}

impl CommunicationsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, normalized: &Normalized) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = format!(
            "{} [{:?}] {}",
            Utc::now().to_rfc3339(),
            normalized.derived.kind,
            normalized
                .observed
                .content
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| normalized.observed.raw.to_string()),
        );
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

    /// Last `n` lines, oldest first — the changelog tail shown in context.
    pub async fn tail(&self, n: usize) -> std::io::Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }
}
