use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of an [`AbeTurn`]. Transitions only ever move forward:
/// `Pending → Completed | Interrupted`. Once `Completed` or `Interrupted`
/// the entry is immutable except for later truncation of `results` by the
/// context assembler's overflow-safe windowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Completed,
    Interrupted,
}

/// An external stimulus observed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuppieEvent {
    pub id: String,
    pub agent: String,
    pub timestamp_event: DateTime<Utc>,
    pub event_type: String,
    pub source: String,
    pub content: Value,
}

/// An intent (model's chosen action) and, once it lands, its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbeTurn {
    pub id: String,
    pub agent: String,
    pub parent_event_id: String,
    pub timestamp_intent: DateTime<Utc>,
    pub status: TurnStatus,
    pub reasoning: String,
    pub action: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_outcome: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// A tagged journal record — either an observed event or an intent/outcome
/// pair. Serialized one JSON object per line in `working.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalEntry {
    GuppieEvent(GuppieEvent),
    AbeTurn(AbeTurn),
}

impl JournalEntry {
    pub fn id(&self) -> &str {
        match self {
            JournalEntry::GuppieEvent(e) => &e.id,
            JournalEntry::AbeTurn(t) => &t.id,
        }
    }

    pub fn as_turn(&self) -> Option<&AbeTurn> {
        match self {
            JournalEntry::AbeTurn(t) => Some(t),
            JournalEntry::GuppieEvent(_) => None,
        }
    }

    pub fn as_turn_mut(&mut self) -> Option<&mut AbeTurn> {
        match self {
            JournalEntry::AbeTurn(t) => Some(t),
            JournalEntry::GuppieEvent(_) => None,
        }
    }
}
