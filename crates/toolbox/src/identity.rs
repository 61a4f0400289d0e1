//! The mutable identity record. Loaded once at startup; `write_file` on the
//! identity path refreshes it in place so the next think cycle's
//! `IDENTITY_PASSPORT` block reflects the edit without a restart.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "default_temp")]
    pub temp: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Unknown keys round-trip instead of being dropped.
    #[serde(flatten)]
    pub extra: Value,
}

fn default_temp() -> f64 {
    0.7
}

fn default_top_k() -> u32 {
    40
}

impl Identity {
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn load_or_default(path: impl AsRef<Path>, agent_name: &str) -> Self {
        Self::load(path).unwrap_or_else(|_| Self {
            name: agent_name.to_string(),
            persona: None,
            parent: None,
            temp: default_temp(),
            top_k: default_top_k(),
            extra: serde_json::json!({}),
        })
    }

    pub fn to_passport_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_default_falls_back_when_missing() {
        let identity = Identity::load_or_default("/nonexistent/.agent-identity", "a1");
        assert_eq!(identity.name, "a1");
        assert_eq!(identity.top_k, 40);
    }

    #[test]
    fn unknown_keys_round_trip_through_extra() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".agent-identity");
        std::fs::write(&path, r#"{"name": "a1", "temp": 0.9, "top_k": 32, "favorite_color": "teal"}"#)?;
        let identity = Identity::load(&path)?;
        assert_eq!(identity.extra["favorite_color"], "teal");
        let rendered = identity.to_passport_json();
        assert!(rendered.contains("favorite_color"));
        Ok(())
    }
}
