//! Tracked subprocess execution for `shell` and `remote_exec`: both spawn,
//! return immediately, and let a monitor task apply the Machete and patch
//! the outcome once the child exits (or is hard-killed on timeout).
//!
//! Grounded on `crates/exec/src/lib.rs`'s `ToolExecutor::execute` (capture
//! stdout/stderr, truncate, report success by exit status) generalized to
//! the detached fire-and-patch shape the original's tracked-subprocess map
//! uses instead of awaiting the child inline.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;

use agent_journal::Journal;

/// Hard cap on captured stdout/stderr before it ever reaches `results`.
pub const MACHETE_LIMIT: usize = 20_000;

/// Truncate `text` to `MACHETE_LIMIT` chars, on a UTF-8 boundary, noting
/// how many characters were removed.
pub fn machete(text: &str) -> String {
    if text.chars().count() <= MACHETE_LIMIT {
        return text.to_string();
    }
    let kept: String = text.chars().take(MACHETE_LIMIT).collect();
    let removed = text.chars().count() - MACHETE_LIMIT;
    format!("{kept}\n… [OUTPUT TRUNCATED: {removed} chars removed by the Machete]")
}

/// Spawn `bash -c {command}` wrapped in `timeout -k 5 {secs}s`, track it
/// under `turn_id` against `semaphore`, and patch the journal outcome once
/// it exits or is killed.
pub async fn run_tracked_shell(
    journal: Arc<Journal>,
    semaphore: Arc<Semaphore>,
    turn_id: String,
    command: String,
    timeout_secs: u64,
) {
    run_tracked(journal, semaphore, turn_id, "sh", vec![
        "-c".to_string(),
        format!("timeout -k 5 {timeout_secs}s bash -c {}", shell_quote(&command)),
    ])
    .await;
}

/// Same tracked/Machete/patch-outcome shape as `run_tracked_shell`, over
/// `ssh {host} {command}` instead of a local shell.
pub async fn run_tracked_remote_exec(
    journal: Arc<Journal>,
    semaphore: Arc<Semaphore>,
    turn_id: String,
    host: String,
    command: String,
    timeout_secs: u64,
) {
    run_tracked(journal, semaphore, turn_id, "ssh", vec![
        host,
        format!("timeout -k 5 {timeout_secs}s bash -c {}", shell_quote(&command)),
    ])
    .await;
}

async fn run_tracked(journal: Arc<Journal>, semaphore: Arc<Semaphore>, turn_id: String, program: &str, args: Vec<String>) {
    let _permit = semaphore.acquire_owned().await.expect("subprocess semaphore closed");

    let spawned = tokio::process::Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            let results = json!({"error": format!("failed to spawn: {err}")});
            if let Err(e) = journal.patch_outcome(&turn_id, results, true).await {
                tracing::warn!(?e, turn_id, "patch_outcome failed after spawn error");
            }
            return;
        }
    };

    // Generous outer bound on top of the inner `timeout` wrapper: the
    // wrapper is what actually kills the grandchild tree, this guards
    // against the wrapper binary itself being missing or hanging.
    let wait_budget = Duration::from_secs(300);
    let output = tokio::time::timeout(wait_budget, child.wait_with_output()).await;

    let results = match output {
        Ok(Ok(output)) => {
            let stdout = machete(&String::from_utf8_lossy(&output.stdout));
            let stderr = machete(&String::from_utf8_lossy(&output.stderr));
            json!({
                "success": output.status.success(),
                "exit_code": output.status.code(),
                "stdout": stdout,
                "stderr": stderr,
            })
        }
        Ok(Err(err)) => json!({"error": format!("subprocess wait failed: {err}")}),
        Err(_) => {
            tracing::warn!(turn_id, "subprocess exceeded outer wait budget, abandoning");
            json!({"error": "subprocess did not exit within the outer wait budget"})
        }
    };

    if let Err(e) = journal.patch_outcome(&turn_id, results, true).await {
        tracing::warn!(?e, turn_id, "patch_outcome failed for tracked subprocess");
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machete_passes_short_text_through() {
        assert_eq!(machete("short"), "short");
    }

    #[test]
    fn machete_truncates_and_reports_removed_count() {
        let text = "x".repeat(MACHETE_LIMIT + 500);
        let result = machete(&text);
        assert!(result.starts_with(&"x".repeat(MACHETE_LIMIT)));
        assert!(result.contains("500 chars removed"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[tokio::test]
    async fn run_tracked_shell_patches_outcome_on_success() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let bus = Arc::new(agent_bus::InMemoryBus::new());
        let journal = Arc::new(Journal::new(
            "a1",
            dir.path().join("working.log"),
            dir.path().join("archive"),
            bus,
            30,
            15,
        ));

        let event_id = journal.append_event("AlarmClock", json!({}), "scheduler").await?;
        journal.append_intent("turn-1", &event_id, "run it", json!({"tool": "shell"}), None).await?;

        let semaphore = Arc::new(Semaphore::new(4));
        run_tracked_shell(journal.clone(), semaphore, "turn-1".to_string(), "echo hello".to_string(), 10).await;

        let buffer = journal.buffer_snapshot().await;
        let turn = buffer[1].as_turn().unwrap();
        assert_eq!(turn.status, agent_journal::TurnStatus::Completed);
        assert!(turn.results.as_ref().unwrap()["stdout"].as_str().unwrap().contains("hello"));
        Ok(())
    }
}
