//! Model selection, rate limiting, JSON repair, implicit escalation, and
//! the deadman switch — the "think" half of the perceive-think-act loop.
//!
//! Grounded on the original `run_think_cycle`: urgency bypasses the
//! Governor, Flash/Pro tier selection depends on whether the stimulus is a
//! chat message, a malformed response gets one forced-Pro repair attempt,
//! and a Flash response naming a forbidden tool gets one forced-Pro
//! escalation before any action is logged.

mod deadman;
mod governor;

pub use deadman::DeadmanGuard;
pub use governor::Governor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use agent_llm::{repair_json, ChatMessage, LlmClient, LlmError, ModelTier};

/// Tools Flash may never choose directly — selecting one forces escalation
/// to Pro with a system notice instead of executing.
pub const FLASH_FORBIDDEN_TOOLS: &[&str] =
    &["shell", "write_file", "spawn_agent", "remote_exec", "spawn_scribe"];

#[derive(Debug, Error)]
pub enum CognitionError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
}

/// What the scheduler should do after a think cycle completes.
#[derive(Debug, Clone)]
pub enum ThinkOutcome {
    /// An intent was produced and should be journaled + executed.
    Intent {
        tier_used: ModelTier,
        escalated: bool,
        reasoning: String,
        action: Value,
        thought_signature: Option<String>,
    },
    /// The Governor's rate limit was hit; caller should enter cooldown
    /// without calling the LLM at all.
    GovernorTripped,
}

pub struct ThinkRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: Option<&'a Value>,
    pub is_chat: bool,
    pub is_urgent: bool,
    /// Force a specific tier regardless of `is_chat` (used for deadman
    /// retries initiated by the caller, distinct from this engine's own
    /// internal JSON-repair/escalation reruns).
    pub force_tier: Option<ModelTier>,
}

pub struct CognitionEngine {
    llm: Arc<dyn LlmClient>,
    governor: Mutex<Governor>,
}

impl CognitionEngine {
    pub fn new(llm: Arc<dyn LlmClient>, governor_limit: usize, governor_window: Duration) -> Self {
        Self {
            llm,
            governor: Mutex::new(Governor::new(governor_limit, governor_window)),
        }
    }

    pub async fn trip_cooldown(&self, duration: Duration) {
        self.governor.lock().await.trip_cooldown(duration);
    }

    pub async fn is_cooling_down(&self) -> bool {
        self.governor.lock().await.is_cooling_down()
    }

    /// Run one think cycle: governor gate, model call, JSON repair retry,
    /// implicit escalation. Never calls the LLM twice for the same
    /// conceptual cycle without logging why (matches the original's single
    /// recursive retry depth for each failure mode).
    pub async fn think(&self, request: ThinkRequest<'_>) -> Result<ThinkOutcome, CognitionError> {
        if !request.is_urgent {
            let allowed = self.governor.lock().await.check_limit();
            if !allowed {
                return Ok(ThinkOutcome::GovernorTripped);
            }
        }

        let initial_tier = request.force_tier.unwrap_or(if request.is_chat {
            ModelTier::Flash
        } else {
            ModelTier::Pro
        });

        self.think_at_tier(request.messages.to_vec(), request.tools.cloned(), initial_tier, 0)
            .await
    }

    /// Owned `messages`/`tools` (rather than borrows tied to the caller)
    /// so each retry can append a system notice and recurse without
    /// fighting the borrow checker over a boxed self-referential future.
    fn think_at_tier(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Value>,
        tier: ModelTier,
        json_retry_count: u8,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ThinkOutcome, CognitionError>> + Send + '_>> {
        Box::pin(async move {
            let response = self.llm.complete(tier, &messages, tools.as_ref()).await?;

            let mut parsed = match repair_json(&response.content) {
                Ok(value) => value,
                Err(_) if json_retry_count < 1 => {
                    tracing::warn!(?tier, "malformed JSON response, escalating to Pro for repair");
                    let mut retry_messages = messages.clone();
                    retry_messages.push(ChatMessage::user(
                        "SYSTEM ALERT: Your last response was invalid JSON. You must fix the \
                         JSON syntax. Check for unescaped quotes in the log data.",
                    ));
                    return self
                        .think_at_tier(retry_messages, tools.clone(), ModelTier::Pro, json_retry_count + 1)
                        .await;
                }
                Err(_) => {
                    tracing::error!("JSON repair failed after retry, giving up");
                    return Ok(ThinkOutcome::Intent {
                        tier_used: tier,
                        escalated: json_retry_count > 0,
                        reasoning: "JSON repair failed twice. Safety shutdown.".to_string(),
                        action: serde_json::json!({"tool": "hibernate"}),
                        thought_signature: None,
                    });
                }
            };

            // Any thoughtSignature the model wrote into its own JSON is untrusted
            // and scrubbed; the real one is re-attached from the response
            // envelope below, out-of-band from anything the model authored.
            if let Some(obj) = parsed.as_object_mut() {
                obj.remove("thoughtSignature");
            }
            let reasoning = parsed
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("No reasoning provided.")
                .to_string();
            let action = parsed
                .get("action")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"tool": "hibernate"}));
            let thought_signature = response.thought_signature.clone();
            let tool = action.get("tool").and_then(Value::as_str).unwrap_or("hibernate");

            if tier == ModelTier::Flash && FLASH_FORBIDDEN_TOOLS.contains(&tool) {
                tracing::warn!(tool, "flash attempted forbidden tool, escalating to pro");
                let mut escalated_messages = messages.clone();
                escalated_messages.push(ChatMessage::user(format!(
                    "[SYSTEM NOTICE] Your chat layer (Flash) attempted to run '{tool}' but was \
                     denied. You are now awake (Pro). Review the context and decide if this \
                     action is required."
                )));
                let outcome = self
                    .think_at_tier(escalated_messages, tools.clone(), ModelTier::Pro, json_retry_count)
                    .await?;
                return Ok(match outcome {
                    ThinkOutcome::Intent { tier_used, reasoning, action, thought_signature, .. } => {
                        ThinkOutcome::Intent { tier_used, escalated: true, reasoning, action, thought_signature }
                    }
                    other => other,
                });
            }

            Ok(ThinkOutcome::Intent {
                tier_used: tier,
                escalated: false,
                reasoning,
                action,
                thought_signature,
            })
        })
    }
}

/// Urgency bypasses the Governor entirely: synchronous chat, a system
/// escalation notice, an alarm firing, or the agent's own task completions.
pub fn is_urgent(channel: Option<&str>, event_type: Option<&str>, has_system_notice: bool) -> bool {
    if channel == Some("chat:synchronous") {
        return true;
    }
    if has_system_notice {
        return true;
    }
    matches!(event_type, Some("Alarm") | Some("TaskCompleted"))
}
