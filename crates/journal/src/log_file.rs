//! Durable, crash-safe storage for the journal's JSONL log file.
//!
//! Grounded on the teacher's `MemoryEventLog`: appends are flushed and
//! fsync'd immediately; full rewrites go through a `.tmp` sibling plus
//! `fsync` plus `rename`, so a crash at any point before the rename leaves
//! the original untouched and a crash after leaves a consistent new file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::schema::JournalEntry;
use crate::JournalError;

#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Atomically replace the file's contents with `entries`.
    pub async fn rewrite(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let filename = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "working.log".to_string());
        let tmp_path = self.path.with_file_name(format!("{filename}.tmp"));

        let write_result: Result<(), JournalError> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    /// Copy the live log to `dest` — used before a prune truncates the
    /// in-memory buffer, so a consistent pre-prune snapshot always exists.
    pub async fn copy_to(&self, dest: impl AsRef<Path>) -> Result<(), JournalError> {
        if !self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = dest.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.path, dest).await?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<JournalEntry>, JournalError> {
        use std::io::{BufRead, BufReader};

        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut corrupt_count = 0usize;

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    corrupt_count += 1;
                    warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt journal line — skipping (preserved in .corrupt sidecar)"
                    );
                    let corrupt_path = self.path.with_extension("log.corrupt");
                    if let Ok(mut bad) = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&corrupt_path)
                    {
                        use std::io::Write as _;
                        let _ = writeln!(bad, "{line}");
                    }
                }
            }
        }

        if corrupt_count > 0 {
            warn!(corrupt_lines = corrupt_count, path = %self.path.display(), "journal loaded with skipped corrupt lines");
        }

        Ok(entries)
    }
}
