//! Synchronous tool implementations — everything except `shell` and
//! `remote_exec`, which are tracked subprocesses (see [`crate::subprocess`]).
//!
//! Each function takes the shared [`crate::ToolboxContext`] and the tool's
//! `args` object and returns `(results, notify)`, mirroring the teacher's
//! `Tool::run` -> `ToolOutput` shape but folding in the spec's per-tool
//! notification policy instead of a single `success` flag.

use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use agent_bus::{inbox_list, talking_stick_lock, GPU_QUEUE};
use agent_todo::ListFilter;

use crate::{arg_str, arg_u64, ToolError, ToolboxContext};

const TALKING_STICK_TTL: Duration = Duration::from_secs(60);

/// `{tool, description}` pairs returned by the `help` tool, in the order
/// the toolbox's `dispatch` match arms appear.
pub const TOOL_TABLE: &[(&str, &str)] = &[
    ("help", "List every available tool and a one-line description."),
    ("manage_clipboard", "Read, add to, remove from, or clear the scratchpad."),
    ("write_file", "Write a file under the agent's home directory."),
    ("spawn_scribe", "Queue a summarization or embedding job on the GPU worker."),
    ("spawn_agent", "Provision a new agent on a remote host over SSH."),
    ("rag_search", "Query the long-term vector memory store."),
    ("todo_list", "List scheduled tasks (due, upcoming, or all)."),
    ("todo_add", "Add a scheduled task."),
    ("todo_complete", "Mark a scheduled task completed."),
    ("snooze_task", "Push a scheduled task's due time back."),
    ("subscribe_channel", "Listen to an additional chat stream."),
    ("unsubscribe_channel", "Stop listening to a chat stream."),
    ("chat_history", "Fetch the last N messages on a channel."),
    ("email_send", "Push an inbox message to another agent."),
    ("chat_post", "Post a message to a chat channel."),
    ("chat_grab_stick", "Acquire the talking-stick lock on a channel."),
    ("chat_ignore", "Decide not to respond; does not wake the scheduler."),
    ("notify_human", "Push a notification to the configured human endpoint."),
    ("alert_human", "Push an urgent notification to the configured human endpoint."),
    ("web_search", "Search the web for a query."),
    ("web_read", "Fetch a URL and extract its article text."),
    ("hibernate", "Do nothing; the agent chooses not to wake itself."),
    ("shell", "Run a shell command (tracked subprocess)."),
    ("remote_exec", "Run a command over SSH (tracked subprocess)."),
];

pub fn help() -> (Value, bool) {
    let table: Vec<Value> = TOOL_TABLE
        .iter()
        .map(|(name, desc)| json!({"tool": name, "description": desc}))
        .collect();
    (json!({"tools": table}), true)
}

pub async fn manage_clipboard(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let action = arg_str(args, "action").unwrap_or("read");
    let results = match action {
        "read" => json!({"content": ctx.clipboard.read().await}),
        "add" => {
            let content = arg_str(args, "content").ok_or_else(|| ToolError::MissingParam("content"))?;
            let outcome = ctx.clipboard.add(content).await?;
            json!({"outcome": format!("{outcome:?}")})
        }
        "remove" => {
            let indices: Vec<usize> = args
                .get("index")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_u64).map(|n| n as usize).collect())
                .unwrap_or_default();
            let removed = ctx.clipboard.remove(&indices).await?;
            json!({"removed": removed})
        }
        "clear" => {
            ctx.clipboard.clear().await?;
            json!({"cleared": true})
        }
        other => json!({"error": format!("unknown manage_clipboard action '{other}'")}),
    };
    Ok((results, true))
}

pub async fn write_file(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let path = arg_str(args, "path").ok_or(ToolError::MissingParam("path"))?;
    let content = arg_str(args, "content").ok_or(ToolError::MissingParam("content"))?;
    let mode = arg_str(args, "mode").unwrap_or("overwrite");

    let as_path = std::path::Path::new(path);
    let full = if as_path.is_absolute() { as_path.to_path_buf() } else { ctx.home_dir.join(as_path) };
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if mode == "append" {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&full).await?;
        file.write_all(content.as_bytes()).await?;
    } else {
        tokio::fs::write(&full, content).await?;
    }

    if full == ctx.identity_path {
        ctx.refresh_identity().await;
        tracing::info!("identity refreshed after write_file");
    }
    if full == ctx.priors_source_path {
        ctx.trigger_priors_compression().await?;
    }

    Ok((json!({"wrote_bytes": content.len(), "path": path}), true))
}

pub async fn spawn_scribe(ctx: &ToolboxContext, turn_id: &str, args: &Value) -> Result<(Value, bool), ToolError> {
    let mode = arg_str(args, "mode").unwrap_or("summarize");
    let content = arg_str(args, "prompt").map(str::to_string).unwrap_or_else(|| {
        arg_str(args, "prompt_file")
            .and_then(|p| std::fs::read_to_string(ctx.home_dir.join(p)).ok())
            .unwrap_or_default()
    });

    if mode == "vectorize" {
        let job = json!({
            "task_id": format!("vec-{turn_id}"),
            "type": "embed",
            "content": content,
            "reply_to": inbox_list(&ctx.agent_name),
        });
        ctx.bus.push(GPU_QUEUE, job).await?;
        return Ok((json!({"queued": "vectorize"}), true));
    }

    let job = json!({
        "task_id": format!("scribe-{turn_id}"),
        "type": "summarize",
        "content": content,
        "model": arg_str(args, "model"),
        "reply_to": inbox_list(&ctx.agent_name),
    });
    ctx.bus.push(GPU_QUEUE, job).await?;
    Ok((json!({"queued": "summarize"}), true))
}

pub async fn spawn_agent(args: &Value) -> Result<(Value, bool), ToolError> {
    let host = arg_str(args, "host").ok_or(ToolError::MissingParam("host"))?;
    let spawn_script = arg_str(args, "spawn_script").ok_or(ToolError::MissingParam("spawn_script"))?;

    let spawned = tokio::process::Command::new("ssh")
        .arg(host)
        .arg("bash -s")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                let _ = stdin.write_all(spawn_script.as_bytes()).await;
            }
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            Ok((json!({"dispatched_to": host}), true))
        }
        Err(err) => Ok((json!({"error": format!("failed to launch provisioning ssh: {err}")}), true)),
    }
}

pub async fn rag_search(ctx: &ToolboxContext, turn_id: &str, args: &Value) -> Result<(Value, bool), ToolError> {
    let query = arg_str(args, "query").ok_or(ToolError::MissingParam("query"))?;
    let job = json!({
        "task_id": format!("rag-{turn_id}"),
        "type": "query",
        "content": query,
        "reply_to": inbox_list(&ctx.agent_name),
    });
    ctx.bus.push(GPU_QUEUE, job).await?;
    // The answer arrives later as a ScribeResult event, a new stimulus in
    // its own right; this turn itself has nothing to report yet.
    Ok((json!({"queued": true}), false))
}

pub async fn todo_list(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let filter = match arg_str(args, "filter").unwrap_or("due") {
        "upcoming" => ListFilter::Upcoming,
        "all" => ListFilter::All,
        _ => ListFilter::Due,
    };
    let tasks = ctx.todo.list(filter).await?;
    Ok((json!({"tasks": tasks}), true))
}

pub async fn todo_add(ctx: &ToolboxContext, turn_id: &str, args: &Value) -> Result<(Value, bool), ToolError> {
    let description = arg_str(args, "description").ok_or(ToolError::MissingParam("description"))?;
    let priority = args.get("priority").and_then(Value::as_i64).unwrap_or(0);
    let due_timestamp = arg_str(args, "due_timestamp").and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&chrono::Utc));

    let task_id = format!("task-{}", Uuid::new_v4());
    let _ = turn_id;
    match ctx.todo.add(task_id, description, priority, due_timestamp, ctx.agent_name.as_str()).await {
        Ok(task) => Ok((json!({"task": task}), false)),
        Err(err) => Ok((json!({"error": err.to_string()}), true)),
    }
}

pub async fn todo_complete(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let task_id = arg_str(args, "task_id").ok_or(ToolError::MissingParam("task_id"))?;
    match ctx.todo.complete(task_id).await {
        Ok(()) => Ok((json!({"completed": task_id}), true)),
        Err(err) => Ok((json!({"error": err.to_string()}), true)),
    }
}

pub async fn snooze_task(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let task_id = arg_str(args, "task_id").ok_or(ToolError::MissingParam("task_id"))?;
    let new_due = arg_str(args, "new_due")
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .ok_or(ToolError::MissingParam("new_due"))?;
    match ctx.todo.snooze(task_id, new_due).await {
        Ok(()) => Ok((json!({"snoozed": task_id}), false)),
        Err(err) => Ok((json!({"error": err.to_string()}), true)),
    }
}

pub async fn subscribe_channel(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let channel = arg_str(args, "channel").ok_or(ToolError::MissingParam("channel"))?;
    let mut subs = ctx.subscriptions.lock().await;
    match subs.subscribe(channel) {
        Ok(()) => Ok((json!({"subscribed": channel}), true)),
        Err(reason) => Ok((json!({"error": reason}), true)),
    }
}

pub async fn unsubscribe_channel(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let channel = arg_str(args, "channel").ok_or(ToolError::MissingParam("channel"))?;
    let mut subs = ctx.subscriptions.lock().await;
    match subs.unsubscribe(channel) {
        Ok(()) => Ok((json!({"unsubscribed": channel}), true)),
        Err(reason) => Ok((json!({"error": reason}), true)),
    }
}

pub async fn chat_history(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let channel = arg_str(args, "channel").ok_or(ToolError::MissingParam("channel"))?;
    let limit = arg_u64(args, "limit").unwrap_or(20).min(20) as usize;
    let entries = ctx.bus.stream_history(channel, limit).await?;
    let messages: Vec<Value> = entries.into_iter().map(|e| e.value).collect();
    Ok((json!({"messages": messages}), true))
}

pub async fn email_send(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let recipient = arg_str(args, "recipient").ok_or(ToolError::MissingParam("recipient"))?;
    let message = arg_str(args, "message").ok_or(ToolError::MissingParam("message"))?;
    let payload = json!({
        "event_type": "NewInboxMessage",
        "from": ctx.agent_name,
        "content": message,
    });
    ctx.bus.push(&inbox_list(recipient), payload).await?;
    Ok((json!({"sent_to": recipient}), true))
}

pub async fn chat_post(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let channel = arg_str(args, "channel").ok_or(ToolError::MissingParam("channel"))?;
    let message = arg_str(args, "message").ok_or(ToolError::MissingParam("message"))?;
    let id = ctx
        .bus
        .stream_append(channel, json!({"from": ctx.agent_name, "message": message}))
        .await?;

    let lock_key = talking_stick_lock(channel);
    if ctx.bus.get(&lock_key).await?.as_deref() == Some(ctx.agent_name.as_str()) {
        ctx.bus.delete(&lock_key).await?;
    }

    Ok((json!({"posted_id": id.to_string()}), true))
}

pub async fn chat_grab_stick(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let channel = arg_str(args, "channel").ok_or(ToolError::MissingParam("channel"))?;
    let lock_key = talking_stick_lock(channel);
    let acquired = ctx.bus.set_nx(&lock_key, &ctx.agent_name, TALKING_STICK_TTL).await?;
    if acquired {
        ctx.bus
            .stream_append(channel, json!({"from": ctx.agent_name, "message": "I am speaking"}))
            .await?;
        Ok((json!({"acquired": true}), true))
    } else {
        let holder = ctx.bus.get(&lock_key).await?;
        Ok((json!({"acquired": false, "holder": holder}), true))
    }
}

pub fn chat_ignore() -> (Value, bool) {
    (json!({"ignored": true}), false)
}

pub async fn notify_human(ctx: &ToolboxContext, args: &Value, urgent: bool) -> Result<(Value, bool), ToolError> {
    let message = arg_str(args, "message").ok_or(ToolError::MissingParam("message"))?;
    let Some(endpoint) = &ctx.notify_push_endpoint else {
        return Ok((json!({"skipped": "no push endpoint configured"}), true));
    };
    let resp = ctx
        .http
        .post(endpoint)
        .json(&json!({"message": message, "urgent": urgent, "agent": ctx.agent_name}))
        .send()
        .await?;
    Ok((json!({"status": resp.status().as_u16()}), true))
}

pub async fn web_search(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let query = arg_str(args, "query").ok_or(ToolError::MissingParam("query"))?;
    let max_results = arg_u64(args, "max_results").unwrap_or(5) as usize;

    let resp = ctx
        .http
        .get("https://duckduckgo.com/html/")
        .query(&[("q", query)])
        .send()
        .await?;
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(4000).collect();
    Ok((json!({"query": query, "max_results": max_results, "raw_excerpt": snippet}), true))
}

pub async fn web_read(ctx: &ToolboxContext, args: &Value) -> Result<(Value, bool), ToolError> {
    let url = arg_str(args, "url").ok_or(ToolError::MissingParam("url"))?;
    let resp = ctx.http.get(url).send().await?;
    let body = resp.text().await.unwrap_or_default();
    let text = strip_html_tags(&body);
    let capped: String = text.chars().take(20_000).collect();
    Ok((json!({"url": url, "text": capped}), true))
}

fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn hibernate() -> (Value, bool) {
    (json!({}), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_tags_removes_markup_and_collapses_whitespace() {
        let html = "<html>\n<body><p>Hello   <b>world</b></p></body></html>";
        assert_eq!(strip_html_tags(html), "Hello world");
    }

    #[test]
    fn help_lists_every_table_entry() {
        let (results, notify) = help();
        assert!(notify);
        assert_eq!(results["tools"].as_array().unwrap().len(), TOOL_TABLE.len());
    }

    #[test]
    fn hibernate_does_not_notify() {
        let (results, notify) = hibernate();
        assert_eq!(results, json!({}));
        assert!(!notify);
    }

    #[test]
    fn chat_ignore_does_not_notify() {
        let (_, notify) = chat_ignore();
        assert!(!notify);
    }
}
