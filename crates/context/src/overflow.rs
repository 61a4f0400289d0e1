//! Overflow-safe truncation of oversized `results` text, with full content
//! preserved to a sidecar file under `overflow/`.

use std::path::{Path, PathBuf};

use serde_json::Value;

pub struct OverflowWriter {
    dir: PathBuf,
}

impl OverflowWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cap `text` to `cap` chars, saving the full text to
    /// `overflow/{turn_id}-{field}.txt` (idempotent: never rewritten if the
    /// file already exists) when it's too long.
    pub fn cap(&self, turn_id: &str, field: &str, text: &str, cap: usize) -> String {
        let len = text.chars().count();
        if len <= cap {
            return text.to_string();
        }

        let filename = format!("{turn_id}-{field}.txt");
        let path = self.dir.join(&filename);
        if !path.exists() {
            if let Err(err) = std::fs::create_dir_all(&self.dir) {
                tracing::warn!(?err, "failed to create overflow dir");
            } else if let Err(err) = std::fs::write(&path, text) {
                tracing::warn!(?err, "failed to write overflow sidecar");
            }
        }

        let split = cap / 2;
        let chars: Vec<char> = text.chars().collect();
        let head: String = chars[..split].iter().collect();
        let tail: String = chars[chars.len() - split..].iter().collect();
        let removed = len - cap;
        format!(
            "{head} … [OUTPUT TRUNCATED: {removed} chars removed. Saved to: {filename}] … {tail}"
        )
    }

    /// Apply truncation to the `stdout`/`stderr`/bare-string fields of a
    /// turn's `results` value, in place.
    pub fn cap_results(&self, turn_id: &str, results: &mut Value, cap: usize) {
        match results {
            Value::String(s) => {
                *s = self.cap(turn_id, "results", s, cap);
            }
            Value::Object(map) => {
                for field in ["stdout", "stderr", "results"] {
                    if let Some(Value::String(s)) = map.get(field) {
                        let capped = self.cap(turn_id, field, s, cap);
                        map.insert(field.to_string(), Value::String(capped));
                    }
                }
            }
            _ => {}
        }
    }

    /// Remove overflow sidecar files older than `max_age` (swept at
    /// startup).
    pub fn sweep_older_than(&self, max_age: std::time::Duration) -> std::io::Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        let now = std::time::SystemTime::now();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age >= max_age {
                        std::fs::remove_file(entry.path())?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}
