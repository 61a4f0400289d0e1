//! Capability interface onto the shared message bus.
//!
//! The bus itself — a Redis-compatible store — is an external collaborator.
//! This crate never assumes more of it than the narrow set of operations the
//! core actually uses: blocking list pop/push, append-only streams with
//! cursor-based reads, range scans, and key/value with TTL. [`InMemoryBus`]
//! implements the same contract over in-process data structures so the rest
//! of the workspace can be tested without a live Redis.

mod cursor;
mod memory;
pub mod retry;
#[cfg(feature = "redis-backend")]
mod redis_backend;

pub use cursor::{Cursor, StreamId};
pub use memory::InMemoryBus;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBus;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// Connection refused, timeout, read-only replica — worth retrying.
    #[error("transient bus error: {0}")]
    Transient(String),
    /// Auth failure, malformed command — fatal for this operation.
    #[error("permanent bus error: {0}")]
    Permanent(String),
}

/// One entry read back from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub stream: String,
    pub id: StreamId,
    pub value: Value,
}

/// The bus capability set consumed by the core. Every operation maps
/// directly onto one row of the external-interface table in the spec.
#[async_trait]
pub trait Bus: Send + Sync {
    /// `LPUSH list value`.
    async fn push(&self, list: &str, value: Value) -> Result<(), BusError>;

    /// `BLPOP list timeout`. `None` means block indefinitely; callers are
    /// expected to cancel the future (e.g. via `tokio::select!`) rather than
    /// rely on a deadline, since re-issuing a cancelled pop is safe — the
    /// bus delivers each payload exactly once to whichever waiter resumes.
    async fn blocking_pop(&self, list: &str, timeout: Option<Duration>) -> Result<Option<Value>, BusError>;

    /// `LPOP list` — non-blocking, used by burst-drain.
    async fn try_pop(&self, list: &str) -> Result<Option<Value>, BusError>;

    /// `XADD stream * value`. Returns the assigned id.
    async fn stream_append(&self, stream: &str, value: Value) -> Result<StreamId, BusError>;

    /// `XREAD streams cursors block`. Returns entries with id strictly
    /// greater than the supplied cursor for each stream, blocking up to
    /// `block` (or indefinitely if `None`) for at least one entry.
    async fn stream_read(
        &self,
        streams: &[(String, Cursor)],
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, BusError>;

    /// `XRANGE`/`XREVRANGE stream count` — most recent `count` entries,
    /// newest first.
    async fn stream_history(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError>;

    /// `XRANGE stream start end` — entries within `[start, end]` inclusive,
    /// oldest first. Used for orientation sync and startup replay.
    async fn stream_range(
        &self,
        stream: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, BusError>;

    /// `SET key value NX PX ttl`. Returns `true` if the key was set (lock
    /// acquired), `false` if it already existed.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, BusError>;

    /// `DEL key`. Returns `true` if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, BusError>;

    /// `SET key value EX ttl` — unconditional set with expiry, used for the
    /// agent status beacon.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;
}

pub const CHAT_GENERAL: &str = "chat:general";
pub const CHAT_SYNCHRONOUS: &str = "chat:synchronous";
pub const VOLITION_ACTION_LOG: &str = "volition:action_log";
pub const VOLITION_HEARTBEAT: &str = "volition:heartbeat";
pub const VOLITION_SOCIAL_DIGESTS: &str = "volition:social_digests";
pub const VOLITION_KILL_SWITCH: &str = "volition:kill_switch";
pub const GPU_QUEUE: &str = "queue:gpu_heavy";

pub fn inbox_list(agent_name: &str) -> String {
    format!("inbox:{agent_name}")
}

pub fn internal_queue(agent_name: &str) -> String {
    format!("internal:{agent_name}")
}

pub fn talking_stick_lock(channel: &str) -> String {
    format!("lock:{channel}")
}
