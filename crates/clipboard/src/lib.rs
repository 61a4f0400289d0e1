//! Persistent indexed scratchpad, survivable across log rotation.
//!
//! Grounded on the teacher's `MemoryStore`: an in-process ordered
//! collection with dedup-on-insert, except here the backing store is a
//! single plain-text file (one line per entry) rather than an in-memory
//! vector, since the clipboard must outlive the process.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Clipboard {
    path: PathBuf,
    lines: Mutex<Vec<String>>,
}

/// Outcome of an `add` — mirrors the tool result the toolbox reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added { index: usize },
    AlreadyExists,
}

impl Clipboard {
    /// Open (or create on first write) the clipboard file at `path`,
    /// loading its current contents.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ClipboardError> {
        let path = path.into();
        let lines = Self::read_lines(&path).await?;
        Ok(Self {
            path,
            lines: Mutex::new(lines),
        })
    }

    async fn read_lines(path: &Path) -> Result<Vec<String>, ClipboardError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn persist(&self, lines: &[String]) -> Result<(), ClipboardError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, lines.join("\n")).await?;
        Ok(())
    }

    /// 1-based numbered listing, `"(Empty)"` when there is nothing stored —
    /// the exact form the context assembler drops into its Clipboard
    /// section and the `manage_clipboard {action: read}` tool returns.
    pub async fn read(&self) -> String {
        let lines = self.lines.lock().await;
        if lines.is_empty() {
            return "(Empty)".to_string();
        }
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}. {line}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn add(&self, content: &str) -> Result<AddOutcome, ClipboardError> {
        let mut lines = self.lines.lock().await;
        if lines.iter().any(|l| l == content) {
            return Ok(AddOutcome::AlreadyExists);
        }
        lines.push(content.to_string());
        self.persist(&lines).await?;
        Ok(AddOutcome::Added { index: lines.len() })
    }

    /// Remove entries by 1-based index. Indices are processed
    /// highest-to-lowest so earlier removals never shift later ones.
    pub async fn remove(&self, indices: &[usize]) -> Result<usize, ClipboardError> {
        let mut lines = self.lines.lock().await;
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let mut removed = 0usize;
        for idx in sorted {
            if idx >= 1 && idx <= lines.len() {
                lines.remove(idx - 1);
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(&lines).await?;
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), ClipboardError> {
        let mut lines = self.lines.lock().await;
        lines.clear();
        self.persist(&lines).await
    }

    pub async fn len(&self) -> usize {
        self.lines.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lines.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_on_fresh_file_is_empty_marker() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clip = Clipboard::open(dir.path().join("clip.md")).await?;
        assert_eq!(clip.read().await, "(Empty)");
        Ok(())
    }

    #[tokio::test]
    async fn add_dedupes_identical_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clip = Clipboard::open(dir.path().join("clip.md")).await?;
        assert_eq!(clip.add("buy milk").await?, AddOutcome::Added { index: 1 });
        assert_eq!(clip.add("buy milk").await?, AddOutcome::AlreadyExists);
        assert_eq!(clip.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn read_formats_as_1_based_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clip = Clipboard::open(dir.path().join("clip.md")).await?;
        clip.add("first").await?;
        clip.add("second").await?;
        assert_eq!(clip.read().await, "1. first\n2. second");
        Ok(())
    }

    #[tokio::test]
    async fn remove_by_descending_index_avoids_shift_bugs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clip = Clipboard::open(dir.path().join("clip.md")).await?;
        clip.add("a").await?;
        clip.add("b").await?;
        clip.add("c").await?;
        let removed = clip.remove(&[1, 3]).await?;
        assert_eq!(removed, 2);
        assert_eq!(clip.read().await, "1. b");
        Ok(())
    }

    #[tokio::test]
    async fn contents_survive_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.md");
        {
            let clip = Clipboard::open(&path).await?;
            clip.add("persisted").await?;
        }
        let reopened = Clipboard::open(&path).await?;
        assert_eq!(reopened.read().await, "1. persisted");
        Ok(())
    }

    #[tokio::test]
    async fn clear_empties_and_persists() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.md");
        let clip = Clipboard::open(&path).await?;
        clip.add("temp").await?;
        clip.clear().await?;
        assert!(clip.is_empty().await);
        let reopened = Clipboard::open(&path).await?;
        assert!(reopened.is_empty().await);
        Ok(())
    }
}
