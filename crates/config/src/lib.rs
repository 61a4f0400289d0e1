//! Runtime configuration, loaded from a TOML file and overridden by
//! environment variables at daemon startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub home_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "a1".to_string(),
            home_dir: "~/.agentd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub endpoint: String,
    pub password: Option<String>,
    /// Base delay for retryable bus calls, seconds.
    pub retry_base_secs: f64,
    pub retry_max_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: "redis://127.0.0.1:6379".to_string(),
            password: None,
            retry_base_secs: 0.5,
            retry_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    /// OpenAI-compatible chat-completions root, no trailing `/chat/completions`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model alias used for the cheap, restricted tier.
    pub flash_model: String,
    /// Model alias used for the full-capability tier.
    pub pro_model: String,
    pub http_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            flash_model: "flash".to_string(),
            pro_model: "pro".to_string(),
            http_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cooldown applied after a chat-triggered think cycle, seconds.
    pub chat_cooldown_secs: f64,
    /// Inclusive lower bound of the randomized cooldown after inbox/alarm cycles.
    pub inbox_cooldown_min_secs: f64,
    /// Inclusive upper bound of the randomized cooldown after inbox/alarm cycles.
    pub inbox_cooldown_max_secs: f64,
    /// Cooldown applied when the Governor rejects a cycle, seconds.
    pub governor_cooldown_secs: f64,
    /// TTL window for trigger-fingerprint deduplication, seconds.
    pub dedupe_ttl_secs: f64,
    /// Maximum extra items drained in one inbox burst.
    pub burst_drain_limit: usize,
    /// Maximum overdue tasks fetched per alarm wake.
    pub alarm_batch_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chat_cooldown_secs: 5.0,
            inbox_cooldown_min_secs: 10.0,
            inbox_cooldown_max_secs: 30.0,
            governor_cooldown_secs: 60.0,
            dedupe_ttl_secs: 90.0,
            burst_drain_limit: 20,
            alarm_batch_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub limit: u32,
    pub window_secs: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            limit: 15,
            window_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub tracked_subprocess_limit: usize,
    pub subprocess_timeout_secs: u64,
    pub ssh_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            tracked_subprocess_limit: 4,
            subprocess_timeout_secs: 150,
            ssh_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// In-memory buffer high-water mark that triggers a background prune.
    pub prune_high_water_mark: usize,
    /// Number of trailing entries kept after a prune.
    pub prune_keep_tail: usize,
    /// Overflow sidecar files older than this (days) are swept at startup.
    pub overflow_sweep_days: i64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            prune_high_water_mark: 30,
            prune_keep_tail: 15,
            overflow_sweep_days: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub bus: BusConfig,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    pub governor: GovernorConfig,
    pub concurrency: ConcurrencyConfig,
    pub journal: JournalConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path.as_ref()) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config at {}", path.as_ref().display()))?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("AGENT_BUS_ENDPOINT") {
            if !v.is_empty() {
                self.bus.endpoint = v;
            }
        }
        if let Ok(v) = env::var("AGENT_BUS_PASSWORD") {
            if !v.is_empty() {
                self.bus.password = Some(v);
            }
        }
        if let Ok(v) = env::var("AGENT_LLM_API_KEY") {
            if !v.is_empty() {
                self.llm.api_key = Some(v);
            }
        }
        if let Ok(v) = env::var("AGENT_LLM_PROVIDER") {
            if !v.is_empty() {
                self.llm.provider = v;
            }
        }
        if let Ok(v) = env::var("AGENT_NAME") {
            if !v.is_empty() {
                self.agent.name = v;
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Resolve `~` in `agent.home_dir` against `$HOME`.
    pub fn home_dir(&self) -> PathBuf {
        if let Some(stripped) = self.agent.home_dir.strip_prefix("~/") {
            if let Ok(home) = env::var("HOME") {
                return PathBuf::from(home).join(stripped);
            }
        }
        PathBuf::from(&self.agent.home_dir)
    }

    pub fn working_log_path(&self) -> PathBuf {
        self.home_dir().join("working.log")
    }

    pub fn communications_log_path(&self) -> PathBuf {
        self.home_dir().join("communications.log")
    }

    pub fn inbox_dump_path(&self) -> PathBuf {
        self.home_dir().join("logs").join("inbox_dump.jsonl")
    }

    pub fn episodes_dir(&self) -> PathBuf {
        self.home_dir().join("memory").join("episodes")
    }

    pub fn tier1_archive_dir(&self) -> PathBuf {
        self.home_dir().join("memory").join("tier_1_archive")
    }

    pub fn overflow_dir(&self) -> PathBuf {
        self.home_dir().join("memory").join("overflow")
    }

    pub fn todo_db_path(&self) -> PathBuf {
        self.home_dir().join("todo.db")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.home_dir().join(".agent-identity")
    }

    pub fn priors_source_path(&self) -> PathBuf {
        self.home_dir().join(".agent-priors.md")
    }

    pub fn priors_stub_path(&self) -> PathBuf {
        self.home_dir().join(".agent-priors.stub")
    }

    pub fn clipboard_path(&self) -> PathBuf {
        self.home_dir()
            .join(format!(".agent-clipboard-{}.md", self.agent.name))
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        self.home_dir().join(".agent-subscriptions")
    }

    /// A persona/system-prompt file the operator edits by hand; missing at
    /// first boot, at which point the daemon falls back to an empty genesis.
    pub fn genesis_path(&self) -> PathBuf {
        self.home_dir().join(".agent-genesis.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = AppConfig::default();
        assert_eq!(config.governor.limit, 15);
        assert_eq!(config.governor.window_secs, 300.0);
        assert_eq!(config.concurrency.tracked_subprocess_limit, 4);
    }

    #[test]
    fn load_missing_file_falls_back_to_default() -> Result<()> {
        let config = AppConfig::load_from("/nonexistent/path/agentd.toml")?;
        assert_eq!(config.agent.name, "a1");
        Ok(())
    }

    #[test]
    fn round_trips_through_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("agentd.toml");
        let mut config = AppConfig::default();
        config.agent.name = "roundtrip".to_string();
        config.save_to(&path)?;

        let loaded = AppConfig::load_from(&path)?;
        assert_eq!(loaded.agent.name, "roundtrip");
        Ok(())
    }

    #[test]
    fn home_dir_expands_tilde() {
        std::env::set_var("HOME", "/home/tester");
        let config = AppConfig::default();
        assert_eq!(config.home_dir(), PathBuf::from("/home/tester/.agentd"));
    }
}
