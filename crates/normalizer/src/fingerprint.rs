//! Ephemeral dedup tracking: fingerprint → observation timestamp, pruned
//! after a TTL window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{content_snippet, is_maintenance, Observed};

pub type Fingerprint = String;

/// Derive the dedup fingerprint for an observation.
///
/// - If `action_id` is present and the message is not a scribe result and
///   not maintenance, use it directly.
/// - Else if it's a scribe result or a maintenance job, mint a fresh unique
///   id so the message always bypasses dedupe.
/// - Else hash `"{event_type}:{content_snippet}"`.
pub fn derive(observed: &Observed) -> Fingerprint {
    let maintenance = is_maintenance(observed);
    if let Some(action_id) = &observed.action_id {
        if !maintenance {
            return action_id.clone();
        }
    }
    if maintenance {
        return format!("scribe:{}", Uuid::new_v4());
    }

    let event_type = observed.event_type.as_deref().unwrap_or("unknown");
    let snippet = content_snippet(observed);
    let mut hasher = Sha256::new();
    hasher.update(snippet.as_bytes());
    let digest = hasher.finalize();
    format!("{event_type}:{:x}", digest)
}

/// TTL-bounded set of recently-seen fingerprints (~90s window per spec).
pub struct DedupeTracker {
    ttl: Duration,
    seen: HashMap<Fingerprint, Instant>,
}

impl DedupeTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    fn prune(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
    }

    /// Returns `true` if this is a new fingerprint (caller should proceed),
    /// `false` if it was seen within the TTL window (caller should drop it).
    pub fn check_and_record(&mut self, observed: &Observed) -> bool {
        self.prune();
        let fp = derive(observed);
        if self.seen.contains_key(&fp) {
            return false;
        }
        self.seen.insert(fp, Instant::now());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize;
    use serde_json::json;
    use std::thread::sleep;

    #[test]
    fn action_id_is_used_directly_when_not_maintenance() {
        let obs = normalize(&json!({"action_id": "abc", "event_type": "NewInboxMessage"})).observed;
        assert_eq!(derive(&obs), "abc");
    }

    #[test]
    fn scribe_result_always_gets_unique_fingerprint() {
        let obs = normalize(&json!({"event_type": "ScribeResult", "action_id": "same"})).observed;
        assert_ne!(derive(&obs), derive(&obs));
    }

    #[test]
    fn identical_content_without_action_id_collides() {
        let a = normalize(&json!({"event_type": "SystemAlert", "content": "disk full"})).observed;
        let b = normalize(&json!({"event_type": "SystemAlert", "content": "disk full"})).observed;
        assert_eq!(derive(&a), derive(&b));
    }

    #[test]
    fn dedupe_tracker_drops_repeat_within_ttl() {
        let mut tracker = DedupeTracker::new(Duration::from_secs(90));
        let obs = normalize(&json!({"event_type": "SystemAlert", "content": "x"})).observed;
        assert!(tracker.check_and_record(&obs));
        assert!(!tracker.check_and_record(&obs));
    }

    #[test]
    fn dedupe_tracker_allows_after_ttl_expiry() {
        let mut tracker = DedupeTracker::new(Duration::from_millis(20));
        let obs = normalize(&json!({"event_type": "SystemAlert", "content": "x"})).observed;
        assert!(tracker.check_and_record(&obs));
        sleep(Duration::from_millis(30));
        assert!(tracker.check_and_record(&obs));
    }

    #[test]
    fn maintenance_jobs_bypass_dedupe() {
        let mut tracker = DedupeTracker::new(Duration::from_secs(90));
        let obs = normalize(&json!({"meta": {"mode": "summarize"}, "content": "same"})).observed;
        assert!(tracker.check_and_record(&obs));
        assert!(tracker.check_and_record(&obs));
    }
}
