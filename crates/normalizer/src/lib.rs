//! Classifies raw inbox payloads into typed observations and filters
//! duplicate stimuli before they reach the journal.
//!
//! Grounded on the teacher's [`BackendEvent`](../../danielmriley-aigent/crates/runtime/src/events.rs)
//! tagged-event shape, generalized to the dynamic, loosely-typed payloads
//! this system receives from the bus rather than a fixed internal enum.

mod fingerprint;
mod wal;

pub use fingerprint::{DedupeTracker, Fingerprint};
pub use wal::RawInboxLog;

use serde_json::Value;

/// What kind of stimulus a normalized payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    HumanMessage,
    ScribeResult,
    SystemEvent,
    StructuredMessage,
    RawMessage,
    Unknown,
}

/// The typed view of a raw bus payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Observed {
    pub raw: Value,
    pub event_type: Option<String>,
    pub from: Option<String>,
    pub meta: Value,
    pub content: Option<Value>,
    pub action_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Derived {
    pub kind: Kind,
    pub inferred: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Normalized {
    pub observed: Observed,
    pub derived: Derived,
}

impl Normalized {
    pub fn is_maintenance(&self) -> bool {
        is_maintenance(&self.observed)
    }
}

/// Parse a raw bus payload (string, bytes-as-string, or already-decoded
/// JSON) into an [`Observed`]/[`Derived`] pair.
///
/// Classification rules, first match wins:
/// - `event_type ∈ {NewInboxMessage, NewChatMessage}` → `HumanMessage`
/// - `event_type ∈ {TaskCompleted, ScribeResult}` → `ScribeResult`
/// - `event_type ∈ {SystemAlert, AlarmClock}` → `SystemEvent`
/// - any object with a recognizable shape → `StructuredMessage`
/// - a string that won't parse as JSON → `RawMessage`
pub fn normalize(raw: &Value) -> Normalized {
    let data = match raw {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or_else(|_| raw.clone()),
        other => other.clone(),
    };

    let Value::Object(map) = &data else {
        return Normalized {
            observed: Observed {
                raw: raw.clone(),
                event_type: None,
                from: None,
                meta: Value::Object(Default::default()),
                content: None,
                action_id: None,
            },
            derived: Derived {
                kind: Kind::RawMessage,
                inferred: false,
            },
        };
    };

    let event_type = map
        .get("event_type")
        .or_else(|| map.get("event"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let from = map.get("from").and_then(Value::as_str).map(str::to_string);
    let meta = map.get("meta").cloned().unwrap_or_else(|| Value::Object(Default::default()));
    let content = map
        .get("content")
        .filter(|v| !v.is_null())
        .or_else(|| map.get("results").filter(|v| !v.is_null()))
        .cloned();

    let action_id = extract_action_id(map, &content, &meta);

    let kind = match event_type.as_deref() {
        Some("NewInboxMessage") | Some("NewChatMessage") => Kind::HumanMessage,
        Some("TaskCompleted") | Some("ScribeResult") => Kind::ScribeResult,
        Some("SystemAlert") | Some("AlarmClock") => Kind::SystemEvent,
        _ if event_type.is_some() || content.is_some() || from.is_some() => Kind::StructuredMessage,
        _ => Kind::Unknown,
    };

    Normalized {
        observed: Observed {
            raw: data,
            event_type,
            from,
            meta,
            content,
            action_id,
        },
        derived: Derived {
            kind,
            inferred: false,
        },
    }
}

/// Action-id extraction order: top-level `action_id`, then
/// `content.{action_id,actionId,task_id,id}`, then `meta.action_id`.
fn extract_action_id(
    map: &serde_json::Map<String, Value>,
    content: &Option<Value>,
    meta: &Value,
) -> Option<String> {
    if let Some(id) = map.get("action_id").and_then(Value::as_str) {
        return Some(id.trim().to_string());
    }
    if let Some(Value::Object(cont)) = content {
        for key in ["action_id", "actionId", "task_id", "id"] {
            if let Some(id) = cont.get(key).and_then(Value::as_str) {
                return Some(id.trim().to_string());
            }
        }
    }
    if let Some(id) = meta.get("action_id").and_then(Value::as_str) {
        return Some(id.trim().to_string());
    }
    None
}

/// Scribe results and maintenance jobs must always run — never deduped.
pub fn is_maintenance(observed: &Observed) -> bool {
    if observed.event_type.as_deref() == Some("ScribeResult") {
        return true;
    }
    let meta = &observed.meta;
    meta.get("maintenance").and_then(Value::as_bool) == Some(true)
        || meta.get("source_tier_1").is_some()
        || meta.get("mode").and_then(Value::as_str) == Some("summarize")
}

/// Build the `{event_type}:{hash}` fallback fingerprint basis (exposed for
/// tests; real callers go through [`DedupeTracker::check_and_record`]).
pub fn content_snippet(observed: &Observed) -> String {
    let content = observed
        .content
        .clone()
        .unwrap_or_else(|| observed.raw.clone());
    let rendered = match &content {
        Value::Object(_) | Value::Array(_) => stable_json(&content),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    rendered.chars().take(300).collect()
}

/// Serialize with sorted object keys so semantically-identical payloads
/// with differently-ordered keys hash the same.
fn stable_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_new_inbox_message_as_human() {
        let raw = json!({"event_type": "NewInboxMessage", "from": "ops", "content": "hi"});
        let norm = normalize(&raw);
        assert_eq!(norm.derived.kind, Kind::HumanMessage);
        assert_eq!(norm.observed.from.as_deref(), Some("ops"));
    }

    #[test]
    fn classifies_scribe_result() {
        let raw = json!({"event_type": "ScribeResult", "content": {"summary": "..."}});
        assert_eq!(normalize(&raw).derived.kind, Kind::ScribeResult);
    }

    #[test]
    fn classifies_alarm_as_system_event() {
        let raw = json!({"event_type": "AlarmClock"});
        assert_eq!(normalize(&raw).derived.kind, Kind::SystemEvent);
    }

    #[test]
    fn unparseable_string_is_raw_message() {
        let raw = json!("not json at all {{{");
        assert_eq!(normalize(&raw).derived.kind, Kind::RawMessage);
    }

    #[test]
    fn action_id_prefers_top_level_over_content_and_meta() {
        let raw = json!({
            "action_id": "top",
            "content": {"action_id": "nested"},
            "meta": {"action_id": "meta"},
        });
        assert_eq!(normalize(&raw).observed.action_id.as_deref(), Some("top"));
    }

    #[test]
    fn action_id_falls_back_to_content_task_id() {
        let raw = json!({"content": {"task_id": "task-42"}});
        assert_eq!(normalize(&raw).observed.action_id.as_deref(), Some("task-42"));
    }

    #[test]
    fn action_id_falls_back_to_meta() {
        let raw = json!({"meta": {"action_id": "meta-id"}});
        assert_eq!(normalize(&raw).observed.action_id.as_deref(), Some("meta-id"));
    }

    #[test]
    fn maintenance_detected_via_mode_summarize() {
        let raw = json!({"meta": {"mode": "summarize"}});
        let norm = normalize(&raw);
        assert!(norm.is_maintenance());
    }

    #[test]
    fn content_snippet_is_key_order_independent() {
        let a = normalize(&json!({"content": {"a": 1, "b": 2}}));
        let b = normalize(&json!({"content": {"b": 2, "a": 1}}));
        assert_eq!(content_snippet(&a.observed), content_snippet(&b.observed));
    }
}
