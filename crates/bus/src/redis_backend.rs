//! Production bus transport, backed by a real Redis-compatible store.
//!
//! Talks to Redis over `redis::aio::ConnectionManager`, which reconnects
//! transparently on transient failures — exactly the kind of hiccup
//! [`crate::retry::with_retry`] is meant to absorb at the call site.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

use crate::{Bus, BusError, Cursor, StreamEntry, StreamId};

pub struct RedisBus {
    manager: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(endpoint: &str, password: Option<&str>) -> Result<Self, BusError> {
        let mut url = endpoint.to_string();
        if let Some(pass) = password {
            if !url.contains('@') {
                url = url.replacen("redis://", &format!("redis://:{pass}@"), 1);
            }
        }
        let client = redis::Client::open(url).map_err(|e| BusError::Permanent(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(map_redis_err)?;
        Ok(Self { manager })
    }
}

fn map_redis_err(err: redis::RedisError) -> BusError {
    if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
        BusError::Transient(err.to_string())
    } else {
        BusError::Permanent(err.to_string())
    }
}

fn encode(value: &Value) -> Result<String, BusError> {
    serde_json::to_string(value).map_err(|e| BusError::Permanent(e.to_string()))
}

fn decode(raw: &str) -> Result<Value, BusError> {
    serde_json::from_str(raw).map_err(|e| BusError::Permanent(e.to_string()))
}

#[async_trait]
impl Bus for RedisBus {
    async fn push(&self, list: &str, value: Value) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let payload = encode(&value)?;
        let _: i64 = conn.lpush(list, payload).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, timeout: Option<Duration>) -> Result<Option<Value>, BusError> {
        let mut conn = self.manager.clone();
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        let result: Option<(String, String)> = conn.blpop(list, secs).await.map_err(map_redis_err)?;
        match result {
            Some((_, raw)) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_pop(&self, list: &str) -> Result<Option<Value>, BusError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.lpop(list, None).await.map_err(map_redis_err)?;
        raw.map(|r| decode(&r)).transpose()
    }

    async fn stream_append(&self, stream: &str, value: Value) -> Result<StreamId, BusError> {
        let mut conn = self.manager.clone();
        let payload = encode(&value)?;
        let id: String = conn
            .xadd(stream, "*", &[("payload", payload)])
            .await
            .map_err(map_redis_err)?;
        StreamId::parse(&id).ok_or_else(|| BusError::Permanent(format!("malformed stream id: {id}")))
    }

    async fn stream_read(
        &self,
        streams: &[(String, Cursor)],
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.manager.clone();
        let keys: Vec<&str> = streams.iter().map(|(s, _)| s.as_str()).collect();
        let ids: Vec<String> = streams
            .iter()
            .map(|(_, cursor)| match cursor {
                Cursor::Start => "0".to_string(),
                Cursor::After(id) => id.to_string(),
                Cursor::Latest => "$".to_string(),
            })
            .collect();

        let mut opts = redis::streams::StreamReadOptions::default();
        if let Some(timeout) = block {
            opts = opts.block(timeout.as_millis() as usize);
        }

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&keys, &ids, &opts)
            .await
            .map_err(map_redis_err)?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let Some(id) = StreamId::parse(&entry.id) else {
                    warn!(id = %entry.id, "skipping malformed stream id from redis");
                    continue;
                };
                let payload: Option<String> = entry.get("payload");
                let Some(payload) = payload else { continue };
                out.push(StreamEntry {
                    stream: stream_key.key.clone(),
                    id,
                    value: decode(&payload)?,
                });
            }
        }
        Ok(out)
    }

    async fn stream_history(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(stream, "+", "-", count)
            .await
            .map_err(map_redis_err)?;
        let mut out = Vec::new();
        for entry in reply.ids.into_iter().rev() {
            let Some(id) = StreamId::parse(&entry.id) else { continue };
            let payload: Option<String> = entry.get("payload");
            let Some(payload) = payload else { continue };
            out.push(StreamEntry {
                stream: stream.to_string(),
                id,
                value: decode(&payload)?,
            });
        }
        Ok(out)
    }

    async fn stream_range(
        &self,
        stream: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange(stream, start.to_string(), end.to_string())
            .await
            .map_err(map_redis_err)?;
        let mut out = Vec::new();
        for entry in reply.ids {
            let Some(id) = StreamId::parse(&entry.id) else { continue };
            let payload: Option<String> = entry.get("payload");
            let Some(payload) = payload else { continue };
            out.push(StreamEntry {
                stream: stream.to_string(),
                id,
                value: decode(&payload)?,
            });
        }
        Ok(out)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as u64));
        let result: Option<String> = conn.set_options(key, value, opts).await.map_err(map_redis_err)?;
        Ok(result.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(map_redis_err)
    }

    async fn delete(&self, key: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await.map_err(map_redis_err)?;
        Ok(removed > 0)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(map_redis_err)
    }
}
