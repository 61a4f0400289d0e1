//! Tier-2 memory ingest: a finished background summarization becomes a
//! markdown episode file on disk, keyed by a random id (the embedding half
//! of the pipeline is an external vector-store concern, out of scope here —
//! see the scheduler's internal-queue handling).

use std::path::{Path, PathBuf};

use agent_normalizer::{Kind, Normalized};
use uuid::Uuid;

/// If `normalized` is a genuine scribe summary (not an `update_stub`
/// maintenance reply, which the maintenance gate handles separately),
/// write it as a new episode file and return its path.
pub async fn ingest(episodes_dir: &Path, normalized: &Normalized) -> std::io::Result<Option<PathBuf>> {
    if normalized.derived.kind != Kind::ScribeResult {
        return Ok(None);
    }
    let meta = &normalized.observed.meta;
    if meta.get("job_type").and_then(|v| v.as_str()) == Some("update_stub") {
        return Ok(None);
    }

    let summary = match normalized
        .observed
        .content
        .as_ref()
        .and_then(|c| c.get("summary").and_then(|v| v.as_str()).or_else(|| c.as_str()))
    {
        Some(text) => text.to_string(),
        None => return Ok(None),
    };

    tokio::fs::create_dir_all(episodes_dir).await?;
    let id = Uuid::new_v4();
    let path = episodes_dir.join(format!("{id}.md"));
    tokio::fs::write(&path, summary).await?;
    Ok(Some(path))
}

/// Read up to `n` most-recently-modified episode files for the context
/// assembler's Tier-2 Episodes section, oldest first (matching the
/// assembler's own "most recent last" take-from-the-end convention).
pub async fn recent(episodes_dir: &Path, n: usize) -> std::io::Result<Vec<String>> {
    if !tokio::fs::try_exists(episodes_dir).await? {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(episodes_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((modified, entry.path()));
        }
    }
    entries.sort_by_key(|(modified, _)| *modified);
    let start = entries.len().saturating_sub(n);
    let mut out = Vec::new();
    for (_, path) in &entries[start..] {
        out.push(tokio::fs::read_to_string(path).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_normalizer::normalize;
    use serde_json::json;

    #[tokio::test]
    async fn ingest_writes_a_markdown_episode() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let normalized = normalize(&json!({
            "event_type": "ScribeResult",
            "content": {"summary": "The agent learned about rust."},
        }));
        let path = ingest(dir.path(), &normalized).await?.unwrap();
        let content = tokio::fs::read_to_string(&path).await?;
        assert!(content.contains("rust"));
        Ok(())
    }

    #[tokio::test]
    async fn ingest_skips_update_stub_replies() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let normalized = normalize(&json!({
            "event_type": "ScribeResult",
            "content": {"summary": "stub content"},
            "meta": {"job_type": "update_stub"},
        }));
        assert!(ingest(dir.path(), &normalized).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn recent_reads_back_written_episodes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let normalized = normalize(&json!({"event_type": "ScribeResult", "content": {"summary": "episode one"}}));
        ingest(dir.path(), &normalized).await?;
        let episodes = recent(dir.path(), 5).await?;
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].contains("episode one"));
        Ok(())
    }
}
