//! Tracks wall-clock sleep duration and social-digest sync position across
//! wakeups, feeding the "orientation" block the context assembler shows
//! after a long sleep.

use std::time::Instant;

use agent_bus::{Bus, BusError, Cursor, StreamId, VOLITION_SOCIAL_DIGESTS};
use agent_context::Orientation;
use serde_json::Value;

/// Orientation is shown whenever the prior wait exceeded this, matching the
/// "waking up from deep sleep" threshold.
pub const DEEP_SLEEP_THRESHOLD_SECS: f64 = 3600.0;

pub struct OrientationTracker {
    last_sleep_ts: Instant,
    last_social_sync_cursor: StreamId,
}

impl OrientationTracker {
    pub fn new() -> Self {
        Self {
            last_sleep_ts: Instant::now(),
            last_social_sync_cursor: StreamId::ZERO,
        }
    }

    /// Call right before entering the wait; returns the instant so
    /// `time_asleep` can be computed accurately once the wait resolves.
    pub fn mark_sleep_start(&mut self) {
        self.last_sleep_ts = Instant::now();
    }

    /// Build the orientation block (if the sleep exceeded the deep-sleep
    /// threshold) by replaying social digests emitted since the last sync,
    /// and advance the sync cursor to the latest one read.
    pub async fn wake(&mut self, bus: &dyn Bus) -> Result<Option<Orientation>, BusError> {
        let time_asleep = self.last_sleep_ts.elapsed().as_secs_f64();
        if time_asleep <= DEEP_SLEEP_THRESHOLD_SECS {
            return Ok(None);
        }

        let entries = bus
            .stream_range(VOLITION_SOCIAL_DIGESTS, self.last_social_sync_cursor, StreamId::new(u64::MAX, u64::MAX))
            .await?;
        let digests: Vec<Value> = entries
            .iter()
            .map(|e| e.value.clone())
            .collect();
        if let Some(last) = entries.last() {
            self.last_social_sync_cursor = last.id;
        }

        Ok(Some(Orientation {
            duration_secs: time_asleep,
            missed_social_activity: digests,
        }))
    }
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the per-stream read cursor forward past `new_id`, only if it's
/// strictly greater than what's stored — the spec's rule 3.
pub fn advance_cursor(current: &mut Cursor, new_id: StreamId) {
    let should_advance = match current {
        Cursor::After(existing) => new_id > *existing,
        Cursor::Start | Cursor::Latest => true,
    };
    if should_advance {
        *current = Cursor::After(new_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_cursor_only_moves_forward() {
        let mut cursor = Cursor::After(StreamId::new(10, 0));
        advance_cursor(&mut cursor, StreamId::new(5, 0));
        assert_eq!(cursor, Cursor::After(StreamId::new(10, 0)));

        advance_cursor(&mut cursor, StreamId::new(20, 0));
        assert_eq!(cursor, Cursor::After(StreamId::new(20, 0)));
    }
}
