//! The refractory wait loop: races always-hot stimulus sources (chat
//! streams, the kill switch, the internal reply queue, a subprocess
//! wakeup) against refractory sources (the inbox, the due-task alarm)
//! that only arm once any prior cooldown has elapsed.
//!
//! Grounded on the teacher's `tokio::select!` connection-accept loop and
//! its Task-C proactive-check background loop in
//! `crates/runtime/src/server.rs` — both pair a shutdown signal with a
//! cooldown-guarded timer inside `loop { select! {...} }`.

mod comms_log;
mod episodes;
mod orientation;

pub use comms_log::CommunicationsLog;
pub use orientation::{OrientationTracker, DEEP_SLEEP_THRESHOLD_SECS};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use agent_bus::{
    inbox_list, internal_queue, Bus, BusError, Cursor, StreamEntry, CHAT_GENERAL, CHAT_SYNCHRONOUS, VOLITION_KILL_SWITCH,
};
use agent_clipboard::Clipboard;
use agent_cognition::{is_urgent, CognitionEngine, CognitionError, DeadmanGuard, ThinkOutcome, ThinkRequest};
use agent_context::{build_context, ContextInputs, OverflowWriter};
use agent_journal::{Journal, JournalError};
use agent_llm::{ChatMessage, ModelTier};
use agent_normalizer::{normalize, DedupeTracker, Kind, RawInboxLog};
use agent_todo::{ListFilter, TodoError, TodoStore};
use agent_toolbox::{Toolbox, ToolboxContext};
use orientation::advance_cursor;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("todo store error: {0}")]
    Todo(#[from] TodoError),
    #[error("cognition error: {0}")]
    Cognition(#[from] CognitionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mirrors `SchedulerConfig`'s fields without pulling in `agent-config` —
/// every crate below `daemon` takes plain values, not config structs.
pub struct SchedulerOptions {
    pub agent_name: String,
    pub genesis_text: String,
    pub chat_cooldown_secs: f64,
    pub inbox_cooldown_min_secs: f64,
    pub inbox_cooldown_max_secs: f64,
    pub governor_cooldown_secs: f64,
    pub dedupe_ttl_secs: f64,
    pub burst_drain_limit: usize,
    pub alarm_batch_limit: usize,
}

pub struct Scheduler {
    opts: SchedulerOptions,
    bus: Arc<dyn Bus>,
    journal: Arc<Journal>,
    todo: Arc<TodoStore>,
    clipboard: Arc<Clipboard>,
    cognition: Arc<CognitionEngine>,
    toolbox: Arc<Toolbox>,
    toolbox_ctx: Arc<ToolboxContext>,
    overflow: OverflowWriter,
    comms_log: CommunicationsLog,
    raw_inbox_log: RawInboxLog,
    episodes_dir: PathBuf,
    priors_stub_path: PathBuf,
    cursors: Mutex<HashMap<String, Cursor>>,
    cooldown_until: Mutex<Option<DateTime<Utc>>>,
    dedupe: Mutex<DedupeTracker>,
    orientation: Mutex<OrientationTracker>,
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        opts: SchedulerOptions,
        bus: Arc<dyn Bus>,
        journal: Arc<Journal>,
        todo: Arc<TodoStore>,
        clipboard: Arc<Clipboard>,
        cognition: Arc<CognitionEngine>,
        toolbox: Arc<Toolbox>,
        toolbox_ctx: Arc<ToolboxContext>,
        overflow: OverflowWriter,
        comms_log: CommunicationsLog,
        raw_inbox_log: RawInboxLog,
        episodes_dir: impl Into<PathBuf>,
        priors_stub_path: impl Into<PathBuf>,
    ) -> Self {
        let dedupe_ttl = Duration::from_secs_f64(opts.dedupe_ttl_secs.max(0.0));
        Self {
            opts,
            bus,
            journal,
            todo,
            clipboard,
            cognition,
            toolbox,
            toolbox_ctx,
            overflow,
            comms_log,
            raw_inbox_log,
            episodes_dir: episodes_dir.into(),
            priors_stub_path: priors_stub_path.into(),
            cursors: Mutex::new(HashMap::new()),
            cooldown_until: Mutex::new(None),
            dedupe: Mutex::new(DedupeTracker::new(dedupe_ttl)),
            orientation: Mutex::new(OrientationTracker::new()),
        }
    }

    /// The main refractory loop. Replays any journal entries left pending
    /// by a crash, then waits forever (or until `shutdown_rx` fires or the
    /// kill switch stream is seen) racing hot sources against refractory
    /// ones.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        let recovery = self.journal.recover().await?;
        if !recovery.interrupted_turn_ids.is_empty() {
            tracing::warn!(count = recovery.interrupted_turn_ids.len(), "recovered interrupted turns from prior crash");
        }

        loop {
            let now = Utc::now();
            let cooldown_until = *self.cooldown_until.lock().await;
            let in_cooldown = cooldown_until.map(|u| now < u).unwrap_or(false);
            let cooldown_remaining = cooldown_until
                .map(|u| (u - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(Duration::ZERO);

            let streams = self.streams_with_cursors().await;
            let internal_name = internal_queue(&self.opts.agent_name);
            let inbox_name = inbox_list(&self.opts.agent_name);
            let next_due_secs = if in_cooldown {
                None
            } else {
                self.todo.seconds_until_next_due().await?
            };

            self.orientation.lock().await.mark_sleep_start();

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_ok() && *shutdown_rx.borrow() {
                        tracing::info!("scheduler stopping on shutdown signal");
                        return Ok(());
                    }
                }
                stream_res = self.bus.stream_read(&streams, None) => {
                    match stream_res {
                        Ok(entries) => {
                            if self.apply_stream_entries(entries).await? {
                                return Ok(());
                            }
                        }
                        Err(err) => tracing::warn!(?err, "stream_read failed"),
                    }
                }
                internal_res = self.bus.blocking_pop(&internal_name, None) => {
                    match internal_res {
                        Ok(Some(value)) => self.handle_internal_item(value).await?,
                        Ok(None) => {}
                        Err(err) => tracing::warn!(?err, "internal queue pop failed"),
                    }
                }
                _ = self.toolbox_ctx.subprocess_wakeup.notified() => {
                    tracing::debug!("local wakeup: tracked subprocess completed");
                }
                inbox_res = self.bus.blocking_pop(&inbox_name, None), if !in_cooldown => {
                    match inbox_res {
                        Ok(Some(value)) => self.drain_inbox_burst(value).await?,
                        Ok(None) => {}
                        Err(err) => tracing::warn!(?err, "inbox pop failed"),
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(next_due_secs.unwrap_or(0.0).max(0.0))), if next_due_secs.is_some() => {
                    self.handle_alarm().await?;
                }
                _ = tokio::time::sleep(cooldown_remaining), if in_cooldown => {
                    // cooldown elapsed; loop around and re-arm the refractory sources
                }
            }
        }
    }

    async fn hot_stream_names(&self) -> Vec<String> {
        let mut names = vec![CHAT_SYNCHRONOUS.to_string(), CHAT_GENERAL.to_string(), VOLITION_KILL_SWITCH.to_string()];
        for sub in self.toolbox_ctx.subscriptions.lock().await.channels() {
            if !names.contains(&sub) {
                names.push(sub);
            }
        }
        names
    }

    async fn streams_with_cursors(&self) -> Vec<(String, Cursor)> {
        let names = self.hot_stream_names().await;
        let mut cursors = self.cursors.lock().await;
        names
            .into_iter()
            .map(|name| {
                let cursor = *cursors.entry(name.clone()).or_insert(Cursor::Latest);
                (name, cursor)
            })
            .collect()
    }

    /// Returns `true` if the kill switch fired and the loop should stop.
    async fn apply_stream_entries(&self, entries: Vec<StreamEntry>) -> Result<bool, SchedulerError> {
        for entry in &entries {
            {
                let mut cursors = self.cursors.lock().await;
                let cursor = cursors.entry(entry.stream.clone()).or_insert(Cursor::Latest);
                advance_cursor(cursor, entry.id);
            }
            if entry.stream == VOLITION_KILL_SWITCH {
                tracing::warn!("kill switch received, stopping scheduler");
                return Ok(true);
            }
            self.handle_chat_message(entry).await?;
        }
        Ok(false)
    }

    async fn handle_chat_message(&self, entry: &StreamEntry) -> Result<(), SchedulerError> {
        let explicit_subs = self.toolbox_ctx.subscriptions.lock().await.channels();
        let text = entry.value.get("message").and_then(Value::as_str).unwrap_or_default();
        let mentions_me = text.contains(&format!("@{}", self.opts.agent_name)) || text.contains("@all");
        let subscribed = explicit_subs.iter().any(|c| c == &entry.stream);
        let should_wake = entry.stream == CHAT_SYNCHRONOUS || subscribed || mentions_me;
        if !should_wake {
            return Ok(());
        }

        let recent: Vec<Value> = self
            .bus
            .stream_history(&entry.stream, 5)
            .await?
            .into_iter()
            .map(|e| e.value)
            .collect();
        let current_event = json!({
            "event_type": "NewChatMessage",
            "channel": entry.stream,
            "message": entry.value,
            "recent": recent,
        });
        let parent_event_id = self
            .journal
            .append_event("NewChatMessage", current_event.clone(), entry.stream.clone())
            .await?;
        self.run_think_cycle(&parent_event_id, current_event, Some(&entry.stream), Some("NewChatMessage"), true, None, None)
            .await?;
        self.set_cooldown(self.opts.chat_cooldown_secs).await;
        Ok(())
    }

    /// The internal reply queue carries tool-initiated follow-ups (the
    /// scribe/RAG jobs' non-inbox replies); they're journaled for the
    /// record but don't on their own warrant a think cycle — whatever they
    /// report becomes visible through the log buffer on the next cycle.
    async fn handle_internal_item(&self, value: Value) -> Result<(), SchedulerError> {
        self.journal.append_event("InternalReply", value, internal_queue(&self.opts.agent_name)).await?;
        Ok(())
    }

    async fn handle_alarm(&self) -> Result<(), SchedulerError> {
        let overdue = self.todo.list(ListFilter::Due).await?;
        let batch: Vec<_> = overdue.into_iter().take(self.opts.alarm_batch_limit).collect();
        if !batch.is_empty() {
            let current_event = json!({"event_type": "Alarm", "tasks": batch});
            let parent_event_id = self.journal.append_event("Alarm", current_event.clone(), "scheduler").await?;
            self.run_think_cycle(&parent_event_id, current_event, None, Some("Alarm"), false, None, None).await?;
        }
        self.set_cooldown_jitter(self.opts.inbox_cooldown_min_secs, self.opts.inbox_cooldown_max_secs).await;
        Ok(())
    }

    /// Pop one inbox item all the way through to a think cycle, then drain
    /// up to `burst_drain_limit` more non-blocking, one think cycle each,
    /// yielding to the event loop between items so hot sources aren't
    /// starved by a long burst.
    async fn drain_inbox_burst(&self, first: Value) -> Result<(), SchedulerError> {
        let orientation = self.orientation.lock().await.wake(self.bus.as_ref()).await.unwrap_or(None);
        self.process_inbox_payload(first, orientation).await?;

        let mut drained = 0;
        while drained < self.opts.burst_drain_limit {
            match self.bus.try_pop(&inbox_list(&self.opts.agent_name)).await? {
                Some(item) => {
                    self.process_inbox_payload(item, None).await?;
                    drained += 1;
                    tokio::task::yield_now().await;
                }
                None => break,
            }
        }
        self.set_cooldown_jitter(self.opts.inbox_cooldown_min_secs, self.opts.inbox_cooldown_max_secs).await;
        Ok(())
    }

    async fn process_inbox_payload(
        &self,
        raw: Value,
        orientation: Option<agent_context::Orientation>,
    ) -> Result<(), SchedulerError> {
        self.raw_inbox_log.record(&raw).await.map_err(|err| SchedulerError::Io(std::io::Error::other(err)))?;
        let normalized = normalize(&raw);

        {
            let mut dedupe = self.dedupe.lock().await;
            if !dedupe.check_and_record(&normalized.observed) {
                tracing::debug!("dropped duplicate inbox payload");
                return Ok(());
            }
        }

        self.comms_log.append(&normalized).await?;
        if let Some(path) = episodes::ingest(&self.episodes_dir, &normalized).await? {
            tracing::info!(?path, "ingested tier-2 episode");
        }

        if self.maintenance_gate(&normalized).await? {
            return Ok(());
        }

        let event_type = normalized.observed.event_type.clone().unwrap_or_else(|| "RawMessage".to_string());
        let current_event = normalized.observed.raw.clone();
        let parent_event_id = self
            .journal
            .append_event(event_type.clone(), current_event.clone(), inbox_list(&self.opts.agent_name))
            .await?;
        let is_chat = normalized.derived.kind == Kind::HumanMessage;
        self.run_think_cycle(&parent_event_id, current_event, None, Some(&event_type), is_chat, None, orientation)
            .await
    }

    /// Background-job replies that must never trigger an LLM call: a
    /// priors-stub refresh overwrites the stub file directly, and anything
    /// else marked `maintenance`/`source_tier_1` is just a completion
    /// notice already captured by the tier-2 ingest step above.
    async fn maintenance_gate(&self, normalized: &agent_normalizer::Normalized) -> Result<bool, SchedulerError> {
        let meta = &normalized.observed.meta;
        if meta.get("job_type").and_then(Value::as_str) == Some("update_stub") {
            if let Some(content) = &normalized.observed.content {
                let stub_text = content
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| content.get("stub").and_then(Value::as_str).map(str::to_string))
                    .or_else(|| content.get("summary").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| content.to_string());
                tokio::fs::write(&self.priors_stub_path, stub_text).await?;
            }
            self.journal.append_event("MaintenanceCompleted", json!({"job_type": "update_stub"}), "scheduler").await?;
            return Ok(true);
        }
        if meta.get("maintenance").and_then(Value::as_bool) == Some(true) || meta.get("source_tier_1").is_some() {
            self.journal.append_event("MaintenanceCompleted", json!({}), "scheduler").await?;
            return Ok(true);
        }
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_think_cycle(
        &self,
        parent_event_id: &str,
        current_event: Value,
        channel: Option<&str>,
        event_type: Option<&str>,
        is_chat: bool,
        force_tier: Option<ModelTier>,
        orientation: Option<agent_context::Orientation>,
    ) -> Result<(), SchedulerError> {
        let mut deadman = DeadmanGuard::new(self.bus.clone(), self.opts.agent_name.clone(), parent_event_id.to_string());

        let identity_value = {
            let identity = self.toolbox_ctx.identity.lock().await;
            serde_json::to_value(&*identity).unwrap_or_else(|_| json!({}))
        };
        let priors_stub = tokio::fs::read_to_string(&self.priors_stub_path).await.ok();
        let changelog_tail = self.comms_log.tail(30).await.unwrap_or_default();
        let recent_episodes = episodes::recent(&self.episodes_dir, 5).await.unwrap_or_default();
        let clipboard_text = self.clipboard.read().await;
        let log_buffer = self.journal.buffer_snapshot().await;
        let due_tasks: Vec<String> = self
            .todo
            .list(ListFilter::Upcoming)
            .await?
            .into_iter()
            .map(|t| {
                format!(
                    "{}: {} (due {})",
                    t.task_id,
                    t.description,
                    t.due_timestamp.map(|d| d.to_rfc3339()).unwrap_or_else(|| "unscheduled".to_string())
                )
            })
            .collect();

        let is_urgent_cycle = is_urgent(channel, event_type, false);
        let inputs = ContextInputs {
            genesis_text: &self.opts.genesis_text,
            identity_priors_stub: priors_stub.as_deref(),
            fleet_protocols: None,
            identity_passport: &identity_value,
            changelog_tail: &changelog_tail,
            recent_episodes: &recent_episodes,
            clipboard: &clipboard_text,
            orientation: orientation.as_ref(),
            log_buffer: &log_buffer,
            due_tasks: &due_tasks,
            system_notice: None,
            current_event: &current_event,
        };
        let context_text = build_context(&inputs, &self.overflow);
        let messages = vec![ChatMessage::user(context_text)];

        let outcome = self
            .cognition
            .think(ThinkRequest { messages: &messages, tools: None, is_chat, is_urgent: is_urgent_cycle, force_tier })
            .await?;

        match outcome {
            ThinkOutcome::GovernorTripped => {
                tracing::warn!("governor tripped, entering cooldown without calling the model");
                self.journal.append_event("SystemAlert", json!({"event": "RateLimited"}), "scheduler").await?;
                self.set_cooldown(self.opts.governor_cooldown_secs).await;
                deadman.disarm();
            }
            ThinkOutcome::Intent { tier_used, escalated, reasoning, action, thought_signature } => {
                let turn_id = format!("turn-{}", uuid::Uuid::new_v4());
                tracing::debug!(turn_id = %turn_id, tier = ?tier_used, escalated, "dispatching intent");
                self.journal.append_intent(&turn_id, parent_event_id, reasoning, action.clone(), thought_signature).await?;
                if let Err(err) = self.toolbox.dispatch(&turn_id, &action).await {
                    tracing::error!(?err, turn_id = %turn_id, "tool dispatch failed");
                }
                deadman.disarm();
            }
        }
        Ok(())
    }

    async fn set_cooldown(&self, secs: f64) {
        let until = Utc::now() + chrono::Duration::milliseconds((secs.max(0.0) * 1000.0) as i64);
        *self.cooldown_until.lock().await = Some(until);
    }

    async fn set_cooldown_jitter(&self, min: f64, max: f64) {
        let secs = if max > min { rand::thread_rng().gen_range(min..max) } else { min };
        self.set_cooldown(secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus::InMemoryBus;
    use agent_llm::{ChatResponse, LlmClient, LlmError};
    use agent_toolbox::{Identity, SubscriptionSet};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    struct CountingLlm {
        calls: AtomicUsize,
    }

    impl CountingLlm {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn complete(&self, tier: ModelTier, _messages: &[ChatMessage], _tools: Option<&Value>) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                tier,
                content: r#"{"reasoning": "r", "action": {"tool": "hibernate"}}"#.to_string(),
                tool_calls: Vec::new(),
                finish_reason: "stop".to_string(),
                thought_signature: None,
            })
        }
    }

    async fn build_scheduler(dir: &std::path::Path, llm: Arc<CountingLlm>) -> Scheduler {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let journal = Arc::new(Journal::new("a1", dir.join("working.log"), dir.join("archive"), bus.clone(), 30, 15));
        let clipboard = Arc::new(Clipboard::open(dir.join(".agent-clipboard-a1.md")).await.unwrap());
        let todo = Arc::new(TodoStore::open_in_memory().unwrap());
        let toolbox_ctx = Arc::new(ToolboxContext {
            agent_name: "a1".to_string(),
            home_dir: dir.to_path_buf(),
            identity_path: dir.join(".agent-identity"),
            priors_source_path: dir.join(".agent-priors.md"),
            bus: bus.clone(),
            journal: journal.clone(),
            clipboard: clipboard.clone(),
            todo: todo.clone(),
            http: reqwest::Client::new(),
            notify_push_endpoint: None,
            subprocess_semaphore: Arc::new(Semaphore::new(4)),
            subprocess_timeout_secs: 150,
            ssh_timeout_secs: 300,
            identity: Mutex::new(Identity::load_or_default(dir.join(".agent-identity"), "a1")),
            subscriptions: Mutex::new(SubscriptionSet::load(dir.join(".agent-subscriptions"))),
            subprocess_wakeup: Arc::new(Notify::new()),
        });
        let toolbox = Arc::new(Toolbox::new(toolbox_ctx.clone()));
        let cognition = Arc::new(CognitionEngine::new(llm, 15, Duration::from_secs(300)));
        let opts = SchedulerOptions {
            agent_name: "a1".to_string(),
            genesis_text: "you are a1".to_string(),
            chat_cooldown_secs: 5.0,
            inbox_cooldown_min_secs: 10.0,
            inbox_cooldown_max_secs: 30.0,
            governor_cooldown_secs: 60.0,
            dedupe_ttl_secs: 90.0,
            burst_drain_limit: 3,
            alarm_batch_limit: 5,
        };
        Scheduler::new(
            opts,
            bus,
            journal,
            todo,
            clipboard,
            cognition,
            toolbox,
            toolbox_ctx,
            OverflowWriter::new(dir.join("overflow")),
            CommunicationsLog::new(dir.join("communications.log")),
            RawInboxLog::new(dir.join("raw_inbox.log")),
            dir.join("episodes"),
            dir.join(".agent-priors-stub.md"),
        )
    }

    #[tokio::test]
    async fn update_stub_reply_short_circuits_without_llm_call() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let normalized = normalize(&json!({
            "event_type": "ScribeResult",
            "content": "refreshed priors",
            "meta": {"job_type": "update_stub"},
        }));
        let short_circuited = scheduler.maintenance_gate(&normalized).await?;

        assert!(short_circuited);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        let stub = tokio::fs::read_to_string(dir.path().join(".agent-priors-stub.md")).await?;
        assert_eq!(stub, "refreshed priors");
        Ok(())
    }

    #[tokio::test]
    async fn maintenance_flag_short_circuits_without_llm_call() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let normalized = normalize(&json!({
            "event_type": "TaskCompleted",
            "meta": {"source_tier_1": true},
        }));
        assert!(scheduler.maintenance_gate(&normalized).await?);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn plain_reply_does_not_trip_the_maintenance_gate() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let normalized = normalize(&json!({"event_type": "NewInboxMessage", "content": "hello"}));
        assert!(!scheduler.maintenance_gate(&normalized).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribed_channel_does_not_wake() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let entry = StreamEntry {
            stream: "chat:random-room".to_string(),
            id: agent_bus::StreamId::new(1, 0),
            value: json!({"from": "bob", "message": "hey there"}),
        };
        scheduler.handle_chat_message(&entry).await?;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.journal.buffer_snapshot().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn mention_wakes_even_off_the_subscription_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let entry = StreamEntry {
            stream: "chat:random-room".to_string(),
            id: agent_bus::StreamId::new(1, 0),
            value: json!({"from": "bob", "message": "hey @a1 can you help"}),
        };
        scheduler.handle_chat_message(&entry).await?;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn synchronous_channel_always_wakes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        let entry = StreamEntry {
            stream: CHAT_SYNCHRONOUS.to_string(),
            id: agent_bus::StreamId::new(1, 0),
            value: json!({"from": "bob", "message": "quick question"}),
        };
        scheduler.handle_chat_message(&entry).await?;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn inbox_burst_drain_respects_the_configured_limit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(CountingLlm::new());
        let scheduler = build_scheduler(dir.path(), llm.clone()).await;

        for i in 0..10 {
            scheduler
                .bus
                .push(&inbox_list("a1"), json!({"event_type": "NewInboxMessage", "content": format!("msg {i}")}))
                .await?;
        }
        let first = scheduler.bus.try_pop(&inbox_list("a1")).await?.unwrap();
        scheduler.drain_inbox_burst(first).await?;

        // one immediate cycle plus up to `burst_drain_limit` (3) drained extras
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
        let remaining = scheduler.bus.try_pop(&inbox_list("a1")).await?;
        assert!(remaining.is_some(), "items beyond the burst limit stay queued for the next wake");
        Ok(())
    }
}
