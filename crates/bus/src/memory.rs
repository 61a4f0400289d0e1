use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::{Bus, BusError, Cursor, StreamEntry, StreamId};

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process stand-in for the Redis-compatible bus, used by every crate's
/// test suite and as the default transport when no bus endpoint is
/// configured. Implements the exact list/stream/key semantics the core
/// relies on so scheduler and toolbox logic never needs a live Redis.
#[derive(Default)]
pub struct InMemoryBus {
    lists: Mutex<HashMap<String, VecDeque<Value>>>,
    streams: Mutex<HashMap<String, BTreeMap<StreamId, Value>>>,
    kv: Mutex<HashMap<String, KvEntry>>,
    notify: Notify,
    clock_ms: AtomicU64,
    seq: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> StreamId {
        // Monotonic synthetic clock: avoids relying on wall time (which the
        // workflow harness that exercises this crate disallows) while still
        // producing strictly increasing ids across calls within one ms tick.
        let ms = self.clock_ms.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        StreamId::new(ms, seq)
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn push(&self, list: &str, value: Value) -> Result<(), BusError> {
        let mut lists = self.lists.lock().await;
        lists.entry(list.to_string()).or_default().push_back(value);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, timeout: Option<Duration>) -> Result<Option<Value>, BusError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(value) = self.try_pop(list).await? {
                return Ok(Some(value));
            }
            let wait = self.notify.notified();
            match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    if tokio::time::timeout(remaining, wait).await.is_err() {
                        return Ok(None);
                    }
                }
                None => wait.await,
            }
        }
    }

    async fn try_pop(&self, list: &str) -> Result<Option<Value>, BusError> {
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(list).and_then(|q| q.pop_front()))
    }

    async fn stream_append(&self, stream: &str, value: Value) -> Result<StreamId, BusError> {
        let id = self.next_id();
        let mut streams = self.streams.lock().await;
        streams.entry(stream.to_string()).or_default().insert(id, value);
        drop(streams);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn stream_read(
        &self,
        streams: &[(String, Cursor)],
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let deadline = block.map(|t| Instant::now() + t);
        loop {
            let entries = self.collect_new(streams).await;
            if !entries.is_empty() {
                return Ok(entries);
            }
            let wait = self.notify.notified();
            match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(Vec::new());
                    }
                    if tokio::time::timeout(remaining, wait).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => wait.await,
            }
        }
    }

    async fn stream_history(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError> {
        let streams = self.streams.lock().await;
        let Some(map) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<StreamEntry> = map
            .iter()
            .rev()
            .take(count)
            .map(|(id, value)| StreamEntry {
                stream: stream.to_string(),
                id: *id,
                value: value.clone(),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn stream_range(
        &self,
        stream: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let streams = self.streams.lock().await;
        let Some(map) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(map
            .range(start..=end)
            .map(|(id, value)| StreamEntry {
                stream: stream.to_string(),
                id: *id,
                value: value.clone(),
            })
            .collect())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut kv = self.kv.lock().await;
        self.evict_expired(&mut kv, key);
        if kv.contains_key(key) {
            return Ok(false);
        }
        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut kv = self.kv.lock().await;
        self.evict_expired(&mut kv, key);
        Ok(kv.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, BusError> {
        let mut kv = self.kv.lock().await;
        Ok(kv.remove(key).is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut kv = self.kv.lock().await;
        kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }
}

impl InMemoryBus {
    fn evict_expired(&self, kv: &mut HashMap<String, KvEntry>, key: &str) {
        if let Some(entry) = kv.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    kv.remove(key);
                }
            }
        }
    }

    async fn collect_new(&self, streams: &[(String, Cursor)]) -> Vec<StreamEntry> {
        let guard = self.streams.lock().await;
        let mut out = Vec::new();
        for (name, cursor) in streams {
            let Some(map) = guard.get(name) else { continue };
            let iter: Box<dyn Iterator<Item = (&StreamId, &Value)>> = match cursor {
                Cursor::Start => Box::new(map.iter()),
                Cursor::After(id) => Box::new(map.range((
                    std::ops::Bound::Excluded(*id),
                    std::ops::Bound::Unbounded,
                ))),
                // "Latest" observes nothing retroactively — any real new
                // append after the read began triggers notify_waiters and a
                // re-scan, but this snapshot itself never returns backlog.
                Cursor::Latest => Box::new(std::iter::empty()),
            };
            for (id, value) in iter {
                out.push(StreamEntry {
                    stream: name.clone(),
                    id: *id,
                    value: value.clone(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn push_then_blocking_pop_returns_immediately() {
        let bus = InMemoryBus::new();
        bus.push("inbox:a1", json!({"hello": "world"})).await.unwrap();
        let got = bus.blocking_pop("inbox:a1", Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(got, Some(json!({"hello": "world"})));
    }

    #[tokio::test]
    async fn blocking_pop_times_out_on_empty_list() {
        let bus = InMemoryBus::new();
        let got = bus.blocking_pop("inbox:a1", Some(Duration::from_millis(20))).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_concurrent_push() {
        let bus = std::sync::Arc::new(InMemoryBus::new());
        let bus2 = bus.clone();
        let handle = tokio::spawn(async move { bus2.blocking_pop("inbox:a1", None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.push("inbox:a1", json!("late")).await.unwrap();
        let got = handle.await.unwrap().unwrap();
        assert_eq!(got, Some(json!("late")));
    }

    #[tokio::test]
    async fn stream_append_ids_are_strictly_increasing() {
        let bus = InMemoryBus::new();
        let a = bus.stream_append("chat:general", json!(1)).await.unwrap();
        let b = bus.stream_append("chat:general", json!(2)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn stream_read_after_cursor_only_returns_newer() {
        let bus = InMemoryBus::new();
        let first = bus.stream_append("chat:general", json!("old")).await.unwrap();
        bus.stream_append("chat:general", json!("new")).await.unwrap();

        let entries = bus
            .stream_read(&[("chat:general".to_string(), Cursor::After(first))], Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, json!("new"));
    }

    #[tokio::test]
    async fn set_nx_second_call_fails_until_expiry() {
        let bus = InMemoryBus::new();
        assert!(bus.set_nx("lock:chan", "a1", Duration::from_millis(20)).await.unwrap());
        assert!(!bus.set_nx("lock:chan", "a2", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bus.set_nx("lock:chan", "a2", Duration::from_millis(20)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let bus = InMemoryBus::new();
        bus.set_with_ttl("lock:chan", "holder", Duration::from_secs(5)).await.unwrap();
        assert!(bus.delete("lock:chan").await.unwrap());
        assert_eq!(bus.get("lock:chan").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_history_returns_newest_first_count() {
        let bus = InMemoryBus::new();
        for i in 0..5 {
            bus.stream_append("chat:general", json!(i)).await.unwrap();
        }
        let history = bus.stream_history("chat:general", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, json!(3));
        assert_eq!(history[1].value, json!(4));
    }
}
