//! The persisted set of extra chat streams an agent listens to, on top of
//! the always-hot streams. One channel name per line on disk.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Channels that can never be added or removed through
/// `subscribe_channel`/`unsubscribe_channel` — they're managed by the
/// scheduler itself, not by agent choice.
pub const SAFETY_LIST: &[&str] = &["volition:action_log", "volition:heartbeat", "volition:log_stream"];

pub struct SubscriptionSet {
    path: PathBuf,
    channels: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let channels = std::fs::read_to_string(&path)
            .map(|raw| raw.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        Self { path, channels }
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    /// Returns `Err` with a human-readable reason when the channel is on
    /// the safety list.
    pub fn subscribe(&mut self, channel: &str) -> Result<(), String> {
        if SAFETY_LIST.contains(&channel) {
            return Err(format!("'{channel}' is a protected stream and cannot be subscribed to"));
        }
        self.channels.insert(channel.to_string());
        self.persist();
        Ok(())
    }

    /// `chat:synchronous` may never be unsubscribed, nor can anything on
    /// the safety list (it could never have been subscribed in the first
    /// place, but reject explicitly for a clear error message).
    pub fn unsubscribe(&mut self, channel: &str) -> Result<(), String> {
        if channel == "chat:synchronous" {
            return Err("'chat:synchronous' can never be unsubscribed".to_string());
        }
        if SAFETY_LIST.contains(&channel) {
            return Err(format!("'{channel}' is a protected stream and cannot be unsubscribed"));
        }
        self.channels.remove(channel);
        self.persist();
        Ok(())
    }

    fn persist(&self) {
        let body = self.channels.iter().cloned().collect::<Vec<_>>().join("\n");
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.path, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_persist_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".agent-subscriptions");
        {
            let mut set = SubscriptionSet::load(&path);
            set.subscribe("chat:team-a").unwrap();
        }
        let reloaded = SubscriptionSet::load(&path);
        assert_eq!(reloaded.channels(), vec!["chat:team-a".to_string()]);
        Ok(())
    }

    #[test]
    fn rejects_safety_list_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = SubscriptionSet::load(dir.path().join(".agent-subscriptions"));
        assert!(set.subscribe("volition:heartbeat").is_err());
    }

    #[test]
    fn chat_synchronous_cannot_be_unsubscribed() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = SubscriptionSet::load(dir.path().join(".agent-subscriptions"));
        assert!(set.unsubscribe("chat:synchronous").is_err());
    }
}
