//! Durable append-only log of events, intents, and outcomes, with crash
//! recovery and size-bounded rotation.
//!
//! The Journal owns `working.log` and the in-memory buffer that mirrors it.
//! All mutations are serialized by a single lock, matching the spec's
//! ownership rule that nothing else writes this file.

mod log_file;
pub mod schema;

pub use log_file::LogFile;
pub use schema::{AbeTurn, GuppieEvent, JournalEntry, TurnStatus};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use agent_bus::{inbox_list, Bus, BusError};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    /// `patch_outcome` called for a turn_id not present in the buffer.
    #[error("orphaned outcome for turn {turn_id}")]
    OrphanedOutcome { turn_id: String },
}

/// Injected so the journal never has to know how summarization actually
/// happens — the scribe is a subsidiary worker, invoked as a detached
/// subprocess or via bus-queued RPC, and is out of this crate's scope.
#[async_trait]
pub trait PruneHook: Send + Sync {
    async fn request_summary(&self, archive_path: &std::path::Path, entries: &[JournalEntry]);
}

/// A `PruneHook` that pushes a bus-queued RPC request, the "bus-queued RPC"
/// half of the spec's invocation options for subsidiary workers.
pub struct BusPruneHook {
    pub bus: Arc<dyn Bus>,
    pub agent_name: String,
    pub queue: String,
}

#[async_trait]
impl PruneHook for BusPruneHook {
    async fn request_summary(&self, archive_path: &std::path::Path, entries: &[JournalEntry]) {
        let job = serde_json::json!({
            "task_id": format!("prune-{}", Uuid::new_v4()),
            "type": "summarize",
            "content": {
                "archive_path": archive_path.display().to_string(),
                "entry_count": entries.len(),
            },
            "reply_to": inbox_list(&self.agent_name),
            "meta": {"source_tier_1": true},
        });
        if let Err(err) = self.bus.push(&self.queue, job).await {
            warn!(?err, "failed to enqueue prune summarization job");
        }
    }
}

struct Inner {
    buffer: Vec<JournalEntry>,
    pruning: bool,
}

pub struct Journal {
    agent_name: String,
    log: LogFile,
    archive_dir: PathBuf,
    bus: Arc<dyn Bus>,
    prune_hook: Option<Arc<dyn PruneHook>>,
    high_water_mark: usize,
    keep_tail: usize,
    inner: Mutex<Inner>,
}

/// Outcome of crash recovery, surfaced for startup logging.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub interrupted_turn_ids: Vec<String>,
}

impl Journal {
    pub fn new(
        agent_name: impl Into<String>,
        log_path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        bus: Arc<dyn Bus>,
        high_water_mark: usize,
        keep_tail: usize,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            log: LogFile::new(log_path),
            archive_dir: archive_dir.into(),
            bus,
            prune_hook: None,
            high_water_mark,
            keep_tail,
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                pruning: false,
            }),
        }
    }

    pub fn with_prune_hook(mut self, hook: Arc<dyn PruneHook>) -> Self {
        self.prune_hook = Some(hook);
        self
    }

    /// Load the on-disk log into the buffer and mark any `pending` turns as
    /// `interrupted`, as if the process had just restarted after a crash.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport, JournalError> {
        let mut entries = self.log.load()?;
        let mut report = RecoveryReport::default();

        for entry in entries.iter_mut() {
            if let JournalEntry::AbeTurn(turn) = entry {
                if turn.status == TurnStatus::Pending {
                    turn.status = TurnStatus::Interrupted;
                    turn.results = Some(serde_json::json!({"error": "crash/restart detected"}));
                    turn.timestamp_outcome = Some(Utc::now());
                    report.interrupted_turn_ids.push(turn.id.clone());
                }
            }
        }

        if !report.interrupted_turn_ids.is_empty() {
            self.log.rewrite(&entries).await?;
            warn!(count = report.interrupted_turn_ids.len(), "crash recovery marked turns interrupted");
        }

        let mut inner = self.inner.lock().await;
        inner.buffer = entries;
        Ok(report)
    }

    pub async fn buffer_snapshot(&self) -> Vec<JournalEntry> {
        self.inner.lock().await.buffer.clone()
    }

    pub async fn buffer_len(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    #[instrument(skip(self, event_type, content, source))]
    pub async fn append_event(
        &self,
        event_type: impl Into<String>,
        content: Value,
        source: impl Into<String>,
    ) -> Result<String, JournalError> {
        let event = GuppieEvent {
            id: Uuid::new_v4().to_string(),
            agent: self.agent_name.clone(),
            timestamp_event: Utc::now(),
            event_type: event_type.into(),
            source: source.into(),
            content,
        };
        let id = event.id.clone();
        let entry = JournalEntry::GuppieEvent(event);

        let mut inner = self.inner.lock().await;
        self.log.append(&entry).await?;
        inner.buffer.push(entry);
        let should_prune = inner.buffer.len() > self.high_water_mark && !inner.pruning;
        drop(inner);

        if should_prune {
            self.prune().await?;
        }

        Ok(id)
    }

    #[instrument(skip(self, turn_id, parent_event_id, reasoning, action))]
    pub async fn append_intent(
        &self,
        turn_id: impl Into<String>,
        parent_event_id: impl Into<String>,
        reasoning: impl Into<String>,
        action: Value,
        thought_signature: Option<String>,
    ) -> Result<(), JournalError> {
        let turn = AbeTurn {
            id: turn_id.into(),
            agent: self.agent_name.clone(),
            parent_event_id: parent_event_id.into(),
            timestamp_intent: Utc::now(),
            status: TurnStatus::Pending,
            reasoning: reasoning.into(),
            action,
            results: None,
            timestamp_outcome: None,
            thought_signature,
        };
        let entry = JournalEntry::AbeTurn(turn);

        let mut inner = self.inner.lock().await;
        self.log.append(&entry).await?;
        inner.buffer.push(entry);
        Ok(())
    }

    /// Finds the matching pending turn, marks it `completed`, fills
    /// `results`/`timestamp_outcome`, and rewrites the log. If `notify` is
    /// set, pushes a `TaskCompleted` event to the agent's own inbox so the
    /// refractory scheduler wakes to process it.
    #[instrument(skip(self, results))]
    pub async fn patch_outcome(
        &self,
        turn_id: &str,
        results: Value,
        notify: bool,
    ) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().await;
        let found = inner
            .buffer
            .iter_mut()
            .rev()
            .find_map(|entry| entry.as_turn_mut().filter(|t| t.id == turn_id));

        let Some(turn) = found else {
            warn!(turn_id, "patch_outcome: orphaned — no matching pending turn, dropping");
            return Err(JournalError::OrphanedOutcome {
                turn_id: turn_id.to_string(),
            });
        };

        turn.status = TurnStatus::Completed;
        turn.results = Some(results);
        turn.timestamp_outcome = Some(Utc::now());

        let snapshot = inner.buffer.clone();
        drop(inner);

        self.log.rewrite(&snapshot).await?;

        if notify {
            let payload = serde_json::json!({
                "event_type": "TaskCompleted",
                "from": self.agent_name,
                "content": {"turn_id": turn_id},
            });
            if let Err(err) = self.bus.push(&inbox_list(&self.agent_name), payload).await {
                warn!(?err, "failed to push TaskCompleted notification");
            }
        }

        Ok(())
    }

    /// Background prune: archive the current buffer, request a tier-2
    /// summary, then truncate the buffer to its last `keep_tail` entries.
    /// Exclusive — a guard flag prevents concurrent rotations.
    #[instrument(skip(self))]
    pub async fn prune(&self) -> Result<(), JournalError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.pruning {
                return Ok(());
            }
            inner.pruning = true;
        }

        let result = self.prune_inner().await;

        let mut inner = self.inner.lock().await;
        inner.pruning = false;
        result
    }

    async fn prune_inner(&self) -> Result<(), JournalError> {
        let archive_path = self
            .archive_dir
            .join(format!("log-{}.jsonl", Utc::now().timestamp()));
        self.log.copy_to(&archive_path).await?;

        let mut inner = self.inner.lock().await;
        let archived = inner.buffer.clone();
        let tail_start = archived.len().saturating_sub(self.keep_tail);
        inner.buffer = archived[tail_start..].to_vec();
        let snapshot = inner.buffer.clone();
        drop(inner);

        self.log.rewrite(&snapshot).await?;
        info!(archive = %archive_path.display(), kept = snapshot.len(), "journal pruned");

        if let Some(hook) = &self.prune_hook {
            hook.request_summary(&archive_path, &archived).await;
        }

        Ok(())
    }
}
