//! Deadman switch: detects a think cycle that consumed its stimulus and
//! produced no outcome — silenced or timed out without even reaching the
//! crash handler.
//!
//! An RAII guard rather than the original's `try/finally` flag, since Rust
//! has no `finally`: construct it at the top of a cycle, call
//! [`DeadmanGuard::disarm`] once an outcome (success or logged failure) is
//! recorded, and its `Drop` impl pushes `AgentGhosted` if that never
//! happened — including on early-return or panic-unwind paths.

use std::sync::Arc;

use agent_bus::{inbox_list, Bus};

pub struct DeadmanGuard {
    bus: Arc<dyn Bus>,
    agent_name: String,
    cycle_id: String,
    armed: bool,
}

impl DeadmanGuard {
    pub fn new(bus: Arc<dyn Bus>, agent_name: impl Into<String>, cycle_id: impl Into<String>) -> Self {
        Self {
            bus,
            agent_name: agent_name.into(),
            cycle_id: cycle_id.into(),
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DeadmanGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::error!(cycle_id = %self.cycle_id, "cycle ghosted: consumed event without outcome");
        let bus = self.bus.clone();
        let inbox = inbox_list(&self.agent_name);
        let alert = serde_json::json!({
            "type": "SystemAlert",
            "event": "AgentGhosted",
            "content": format!(
                "I stopped processing event {} without a crash log. I may have been silenced or timed out silently.",
                self.cycle_id
            ),
        });
        tokio::spawn(async move {
            let _ = bus.push(&inbox, alert).await;
        });
    }
}
