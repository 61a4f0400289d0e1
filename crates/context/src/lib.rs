//! Prompt assembly: fixed section order, overflow-safe log windowing, and
//! the orientation block shown after a long sleep.
//!
//! Grounded on the teacher's `build_chat_prompt` — independent section
//! builders concatenated by one top-level function — generalized from the
//! teacher's fixed conversational sections to this system's journal-backed
//! working-memory window.

mod overflow;

pub use overflow::OverflowWriter;

use agent_journal::JournalEntry;
use serde_json::Value;

/// Everything the context assembler needs to render one prompt.
pub struct ContextInputs<'a> {
    pub genesis_text: &'a str,
    pub identity_priors_stub: Option<&'a str>,
    pub fleet_protocols: Option<&'a str>,
    pub identity_passport: &'a Value,
    pub changelog_tail: &'a [String],
    pub recent_episodes: &'a [String],
    pub clipboard: &'a str,
    pub orientation: Option<&'a Orientation>,
    pub log_buffer: &'a [JournalEntry],
    pub due_tasks: &'a [String],
    pub system_notice: Option<&'a str>,
    pub current_event: &'a Value,
}

#[derive(Debug, Clone)]
pub struct Orientation {
    pub duration_secs: f64,
    pub missed_social_activity: Vec<Value>,
}

const NORMAL_WINDOW: usize = 20;
const ORIENTED_WINDOW: usize = 3;
const RECENT_CAP: usize = 50_000;
const OLDER_CAP: usize = 1_000;
const MAX_CHANGELOG_LINES: usize = 30;
const MAX_EPISODES: usize = 5;

/// Assemble the full prompt text, sections concatenated in the spec's
/// fixed order.
pub fn build_context(inputs: &ContextInputs<'_>, overflow: &OverflowWriter) -> String {
    let window_size = if inputs.orientation.is_some() {
        ORIENTED_WINDOW
    } else {
        NORMAL_WINDOW
    };
    let log_block = render_log_window(inputs.log_buffer, window_size, overflow);

    let mut sections = Vec::new();
    sections.push(format!("[GENESIS]\n{}", inputs.genesis_text));

    if let Some(stub) = inputs.identity_priors_stub {
        sections.push(format!("[IDENTITY_PRIORS]\n{stub}"));
    }
    if let Some(protocols) = inputs.fleet_protocols {
        sections.push(format!("[FLEET_PROTOCOLS]\n{protocols}"));
    }

    sections.push(format!(
        "[IDENTITY_PASSPORT]\n{}",
        serde_json::to_string_pretty(inputs.identity_passport).unwrap_or_default()
    ));

    let changelog = changelog_tail(inputs.changelog_tail);
    sections.push(format!("[CHANGELOG]\n{changelog}"));

    let episodes = inputs
        .recent_episodes
        .iter()
        .rev()
        .take(MAX_EPISODES)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n---\n");
    sections.push(format!(
        "[TIER_2_EPISODES]\n{}",
        if episodes.is_empty() { "(none)".to_string() } else { episodes }
    ));

    sections.push(format!(
        "[ACTIVE_CLIPBOARD]\n(Persistent scratchpad. Use tool 'manage_clipboard' to edit.)\n{}",
        inputs.clipboard
    ));

    if let Some(orientation) = inputs.orientation {
        sections.push(format!(
            "[ORIENTATION]\n{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "Waking Up from Deep Sleep",
                "duration": orientation.duration_secs,
                "missed_social_activity": orientation.missed_social_activity,
            }))
            .unwrap_or_default()
        ));
    }

    sections.push(format!("[WORKING_MEMORY_LOG]\n{log_block}"));

    let due = if inputs.due_tasks.is_empty() {
        "(none)".to_string()
    } else {
        inputs.due_tasks.join("\n")
    };
    sections.push(format!("[DUE_TASKS]\n{due}"));

    if let Some(notice) = inputs.system_notice {
        sections.push(format!("[SYSTEM_NOTICE]\n{notice}"));
    }

    sections.push(format!(
        "[CURRENT_EVENT]\n{}",
        serde_json::to_string_pretty(inputs.current_event).unwrap_or_default()
    ));

    sections.join("\n\n")
}

fn changelog_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        return "(none)".to_string();
    }
    let start = lines.len().saturating_sub(MAX_CHANGELOG_LINES);
    lines[start..].join("\n")
}

/// Take the last `window` entries, applying the 50,000-char cap to the
/// single most-recent entry and the 1,000-char cap to all older ones.
fn render_log_window(entries: &[JournalEntry], window: usize, overflow: &OverflowWriter) -> String {
    let start = entries.len().saturating_sub(window);
    let windowed = &entries[start..];

    if windowed.is_empty() {
        return "(empty)".to_string();
    }

    let last_index = windowed.len() - 1;
    let rendered: Vec<String> = windowed
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let cap = if i == last_index { RECENT_CAP } else { OLDER_CAP };
            render_entry(entry, cap, overflow)
        })
        .collect();
    rendered.join("\n")
}

fn render_entry(entry: &JournalEntry, cap: usize, overflow: &OverflowWriter) -> String {
    match entry {
        JournalEntry::GuppieEvent(event) => {
            serde_json::to_string(event).unwrap_or_default()
        }
        JournalEntry::AbeTurn(turn) => {
            let mut turn = turn.clone();
            if let Some(results) = turn.results.as_mut() {
                overflow.cap_results(&turn.id, results, cap);
            }
            serde_json::to_string(&turn).unwrap_or_default()
        }
    }
}
