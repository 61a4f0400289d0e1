//! Tool dispatch: runs the action chosen by a think cycle and patches the
//! outcome back into the journal. `shell`/`remote_exec` detach into a
//! tracked subprocess and patch later; everything else runs synchronously
//! and patches immediately.
//!
//! Grounded on the teacher's `ToolRegistry`/`Tool` trait
//! (`crates/tools/src/lib.rs`) and `ToolExecutor::execute`
//! (`crates/exec/src/lib.rs`), generalized from a fixed `args:
//! &HashMap<String, String>` signature to the spec's JSON action shape
//! (`{tool, args}`) since tool parameters here are nested values (clipboard
//! index lists, todo due timestamps), not flat strings.

mod builtins;
pub mod identity;
pub mod subprocess;
mod subscriptions;

pub use identity::Identity;
pub use subprocess::machete;
pub use subscriptions::SubscriptionSet;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, Semaphore};

use agent_bus::{inbox_list, Bus, BusError, GPU_QUEUE};
use agent_clipboard::{Clipboard, ClipboardError};
use agent_journal::{Journal, JournalError};
use agent_todo::{TodoError, TodoStore};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),
    #[error("todo store error: {0}")]
    Todo(#[from] TodoError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing required param: {0}")]
    MissingParam(&'static str),
}

/// Tools Flash may never choose directly (mirrored here for callers that
/// need it without pulling in `agent-cognition`).
pub const FLASH_FORBIDDEN_TOOLS: &[&str] =
    &["shell", "write_file", "spawn_agent", "remote_exec", "spawn_scribe"];

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

/// Shared state every tool implementation needs. Owned by the daemon,
/// wired once at startup.
pub struct ToolboxContext {
    pub agent_name: String,
    pub home_dir: PathBuf,
    pub identity_path: PathBuf,
    pub priors_source_path: PathBuf,
    pub bus: Arc<dyn Bus>,
    pub journal: Arc<Journal>,
    pub clipboard: Arc<Clipboard>,
    pub todo: Arc<TodoStore>,
    pub http: reqwest::Client,
    pub notify_push_endpoint: Option<String>,
    pub subprocess_semaphore: Arc<Semaphore>,
    pub subprocess_timeout_secs: u64,
    pub ssh_timeout_secs: u64,
    pub identity: Mutex<Identity>,
    pub subscriptions: Mutex<SubscriptionSet>,
    /// Pinged once a tracked subprocess finishes, so the scheduler's
    /// always-hot local-wakeup source has something to wait on besides the
    /// notify-via-inbox path.
    pub subprocess_wakeup: Arc<Notify>,
}

impl ToolboxContext {
    async fn refresh_identity(&self) {
        let mut guard = self.identity.lock().await;
        *guard = Identity::load_or_default(&self.identity_path, &self.agent_name);
    }

    /// Modeled on `_trigger_priors_compression` in the original: a write to
    /// the priors-source file kicks off a detached scribe job whose reply
    /// carries `meta.job_type = "update_stub"` so the scheduler's
    /// maintenance gate (not a think cycle) applies the refreshed stub.
    async fn trigger_priors_compression(&self) -> Result<(), ToolError> {
        let job = serde_json::json!({
            "task_id": format!("priors-{}", uuid::Uuid::new_v4()),
            "type": "summarize",
            "content": {"source_path": self.priors_source_path.display().to_string()},
            "reply_to": inbox_list(&self.agent_name),
            "meta": {"job_type": "update_stub"},
        });
        self.bus.push(GPU_QUEUE, job).await?;
        Ok(())
    }
}

/// What happened to a dispatched action. `Detached` means a tracked
/// subprocess is running in the background and will patch its own outcome
/// once it completes; the journal has not been patched yet when this
/// variant is returned.
#[derive(Debug)]
pub enum DispatchOutcome {
    Patched { results: Value, notify: bool },
    Detached,
}

pub struct Toolbox {
    ctx: Arc<ToolboxContext>,
}

impl Toolbox {
    pub fn new(ctx: Arc<ToolboxContext>) -> Self {
        Self { ctx }
    }

    /// Run `action` (the `{tool, args}` object a think cycle produced) and
    /// patch the journal outcome, except for tracked subprocesses which
    /// patch asynchronously once they complete.
    pub async fn dispatch(&self, turn_id: &str, action: &Value) -> Result<DispatchOutcome, ToolError> {
        let tool = action.get("tool").and_then(Value::as_str).unwrap_or("hibernate");
        let args = action.get("args").cloned().unwrap_or_else(|| serde_json::json!({}));
        let ctx = &self.ctx;

        if tool == "shell" || tool == "remote_exec" {
            return self.dispatch_tracked(turn_id, tool, &args).await;
        }

        let attempt: Result<(Value, bool), ToolError> = match tool {
            "help" => Ok(builtins::help()),
            "manage_clipboard" => builtins::manage_clipboard(ctx, &args).await,
            "write_file" => builtins::write_file(ctx, &args).await,
            "spawn_scribe" => builtins::spawn_scribe(ctx, turn_id, &args).await,
            "spawn_agent" => builtins::spawn_agent(&args).await,
            "rag_search" => builtins::rag_search(ctx, turn_id, &args).await,
            "todo_list" => builtins::todo_list(ctx, &args).await,
            "todo_add" => builtins::todo_add(ctx, turn_id, &args).await,
            "todo_complete" => builtins::todo_complete(ctx, &args).await,
            "snooze_task" => builtins::snooze_task(ctx, &args).await,
            "subscribe_channel" => builtins::subscribe_channel(ctx, &args).await,
            "unsubscribe_channel" => builtins::unsubscribe_channel(ctx, &args).await,
            "chat_history" => builtins::chat_history(ctx, &args).await,
            "email_send" => builtins::email_send(ctx, &args).await,
            "chat_post" => builtins::chat_post(ctx, &args).await,
            "chat_grab_stick" => builtins::chat_grab_stick(ctx, &args).await,
            "chat_ignore" => Ok(builtins::chat_ignore()),
            "notify_human" => builtins::notify_human(ctx, &args, false).await,
            "alert_human" => builtins::notify_human(ctx, &args, true).await,
            "web_search" => builtins::web_search(ctx, &args).await,
            "web_read" => builtins::web_read(ctx, &args).await,
            "hibernate" => Ok(builtins::hibernate()),
            other => Ok((serde_json::json!({"error": format!("unknown tool '{other}'")}), true)),
        };

        // A tool call that fails (bad args, a store error) still owes the
        // journal exactly one patch — report the failure as the outcome
        // rather than leaving the turn pending forever.
        let (results, notify) = attempt.unwrap_or_else(|err| (serde_json::json!({"error": err.to_string()}), true));

        ctx.journal.patch_outcome(turn_id, results.clone(), notify).await?;
        Ok(DispatchOutcome::Patched { results, notify })
    }

    async fn dispatch_tracked(&self, turn_id: &str, tool: &str, args: &Value) -> Result<DispatchOutcome, ToolError> {
        let ctx = &self.ctx;
        let command = match arg_str(args, "command") {
            Some(c) => c.to_string(),
            None => {
                let results = serde_json::json!({"error": "missing required param: command"});
                ctx.journal.patch_outcome(turn_id, results.clone(), true).await?;
                return Ok(DispatchOutcome::Patched { results, notify: true });
            }
        };

        let journal = ctx.journal.clone();
        let semaphore = ctx.subprocess_semaphore.clone();
        let wakeup = ctx.subprocess_wakeup.clone();
        let turn_id_owned = turn_id.to_string();

        if tool == "shell" {
            let timeout = ctx.subprocess_timeout_secs.saturating_sub(5).max(1);
            tokio::spawn(async move {
                subprocess::run_tracked_shell(journal, semaphore, turn_id_owned, command, timeout).await;
                wakeup.notify_one();
            });
        } else {
            let host = match arg_str(args, "host") {
                Some(h) => h.to_string(),
                None => {
                    let results = serde_json::json!({"error": "missing required param: host"});
                    ctx.journal.patch_outcome(turn_id, results.clone(), true).await?;
                    return Ok(DispatchOutcome::Patched { results, notify: true });
                }
            };
            let timeout = ctx.ssh_timeout_secs;
            tokio::spawn(async move {
                subprocess::run_tracked_remote_exec(journal, semaphore, turn_id_owned, host, command, timeout).await;
                wakeup.notify_one();
            });
        }
        Ok(DispatchOutcome::Detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus::InMemoryBus;
    use serde_json::json;

    async fn test_context(dir: &std::path::Path) -> Arc<ToolboxContext> {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let journal = Arc::new(Journal::new(
            "a1",
            dir.join("working.log"),
            dir.join("archive"),
            bus.clone(),
            30,
            15,
        ));
        let clipboard = Arc::new(Clipboard::open(dir.join(".agent-clipboard-a1.md")).await.unwrap());
        let todo = Arc::new(TodoStore::open_in_memory().unwrap());
        Arc::new(ToolboxContext {
            agent_name: "a1".to_string(),
            home_dir: dir.to_path_buf(),
            identity_path: dir.join(".agent-identity"),
            priors_source_path: dir.join(".agent-priors.md"),
            bus,
            journal,
            clipboard,
            todo,
            http: reqwest::Client::new(),
            notify_push_endpoint: None,
            subprocess_semaphore: Arc::new(Semaphore::new(4)),
            subprocess_timeout_secs: 150,
            ssh_timeout_secs: 300,
            identity: Mutex::new(Identity::load_or_default(dir.join(".agent-identity"), "a1")),
            subscriptions: Mutex::new(SubscriptionSet::load(dir.join(".agent-subscriptions"))),
            subprocess_wakeup: Arc::new(Notify::new()),
        })
    }

    async fn seed_pending_turn(ctx: &ToolboxContext, turn_id: &str, action: Value) {
        let event_id = ctx.journal.append_event("NewInboxMessage", json!({}), "inbox:a1").await.unwrap();
        ctx.journal.append_intent(turn_id, &event_id, "r", action, None).await.unwrap();
    }

    #[tokio::test]
    async fn hibernate_patches_without_notify() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "hibernate"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let outcome = toolbox.dispatch("t1", &json!({"tool": "hibernate"})).await?;
        assert!(matches!(outcome, DispatchOutcome::Patched { notify: false, .. }));
        assert!(ctx.bus.try_pop("inbox:a1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn manage_clipboard_add_then_read_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "manage_clipboard"})).await;
        seed_pending_turn(&ctx, "t2", json!({"tool": "manage_clipboard"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        toolbox
            .dispatch("t1", &json!({"tool": "manage_clipboard", "args": {"action": "add", "content": "buy milk"}}))
            .await?;
        let outcome = toolbox.dispatch("t2", &json!({"tool": "manage_clipboard", "args": {"action": "read"}})).await?;
        match outcome {
            DispatchOutcome::Patched { results, .. } => {
                assert!(results["content"].as_str().unwrap().contains("buy milk"));
            }
            _ => panic!("expected patched outcome"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn write_file_to_identity_path_refreshes_identity() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "write_file"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let identity_path = ctx.identity_path.to_str().unwrap().to_string();
        toolbox
            .dispatch(
                "t1",
                &json!({
                    "tool": "write_file",
                    "args": {"path": identity_path, "content": r#"{"name": "a1", "persona": "curious"}"#},
                }),
            )
            .await?;

        let identity = ctx.identity.lock().await;
        assert_eq!(identity.persona.as_deref(), Some("curious"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_patches_an_error_and_notifies() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "levitate"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let outcome = toolbox.dispatch("t1", &json!({"tool": "levitate"})).await?;
        match outcome {
            DispatchOutcome::Patched { results, notify } => {
                assert!(notify);
                assert!(results["error"].as_str().unwrap().contains("unknown tool"));
            }
            _ => panic!("expected patched outcome"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn chat_grab_stick_then_chat_post_auto_releases_lock() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "chat_grab_stick"})).await;
        seed_pending_turn(&ctx, "t2", json!({"tool": "chat_post"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        toolbox
            .dispatch("t1", &json!({"tool": "chat_grab_stick", "args": {"channel": "chat:general"}}))
            .await?;
        assert_eq!(ctx.bus.get("lock:chat:general").await?.as_deref(), Some("a1"));

        toolbox
            .dispatch("t2", &json!({"tool": "chat_post", "args": {"channel": "chat:general", "message": "done"}}))
            .await?;
        assert_eq!(ctx.bus.get("lock:chat:general").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn subscribe_channel_rejects_safety_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "subscribe_channel"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let outcome = toolbox
            .dispatch("t1", &json!({"tool": "subscribe_channel", "args": {"channel": "volition:heartbeat"}}))
            .await?;
        match outcome {
            DispatchOutcome::Patched { results, .. } => assert!(results["error"].is_string()),
            _ => panic!("expected patched outcome"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn todo_add_success_does_not_notify() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "todo_add"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let outcome = toolbox
            .dispatch("t1", &json!({"tool": "todo_add", "args": {"description": "water the plants"}}))
            .await?;
        assert!(matches!(outcome, DispatchOutcome::Patched { notify: false, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn shell_tool_detaches_and_patches_later() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path()).await;
        seed_pending_turn(&ctx, "t1", json!({"tool": "shell"})).await;

        let toolbox = Toolbox::new(ctx.clone());
        let outcome = toolbox
            .dispatch("t1", &json!({"tool": "shell", "args": {"command": "echo hi"}}))
            .await?;
        assert!(matches!(outcome, DispatchOutcome::Detached));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let buffer = ctx.journal.buffer_snapshot().await;
        let turn = buffer[1].as_turn().unwrap();
        assert_eq!(turn.status, agent_journal::TurnStatus::Completed);
        Ok(())
    }
}
