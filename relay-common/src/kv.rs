//! Ephemeral key-value store for rate counters, presets and history.
//!
//! The relay keeps all of its short-lived state in one shared store. Every
//! trait method maps to exactly one remote command so callers can reason about
//! which steps are atomic:
//!
//! | Method | Redis command |
//! |--------|---------------|
//! | `incr` | `INCR` |
//! | `expire` | `EXPIRE` |
//! | `get` | `GET` |
//! | `set_ex` | `SET .. EX` |
//! | `del` | `DEL` |
//! | `rpush` | `RPUSH` |
//! | `lrange_all` | `LRANGE key 0 -1` |
//! | `ltrim_front` | `LTRIM key n -1` |
//! | `flush_db` | `FLUSHDB` |
//! | `ping` | `PING` |
//!
//! Two backends are provided:
//!
//! - **In-Memory**: single process, used by tests. Expiry follows the tokio
//!   clock so a paused runtime can step through TTL windows.
//! - **Redis**: production, behind the `redis-backend` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// KV store errors.
#[derive(Error, Debug)]
pub enum KvError {
    /// Connection error to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command was rejected or failed.
    #[error("Command error: {0}")]
    Command(String),

    /// Stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Shared ephemeral store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Increment an integer key, creating it at 1 when absent.
    async fn incr(&self, key: &str) -> KvResult<i64>;

    /// Set a key's time-to-live. No-op when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()>;

    /// Remaining time-to-live. `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Read a string key.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Write a string key with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> KvResult<()>;

    /// Append values to the tail of a list, in order.
    async fn rpush(&self, key: &str, values: &[String]) -> KvResult<()>;

    /// Read a whole list, head first. Empty when absent.
    async fn lrange_all(&self, key: &str) -> KvResult<Vec<String>>;

    /// Drop the first `count` elements of a list.
    async fn ltrim_front(&self, key: &str, count: usize) -> KvResult<()>;

    /// Remove every key in the current database.
    async fn flush_db(&self) -> KvResult<()>;

    /// Round-trip check.
    async fn ping(&self) -> KvResult<()>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory store with Redis-like semantics.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    slots: Mutex<HashMap<String, Slot>>,
}

impl InMemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        slots.values().filter(|s| s.is_live(now)).count()
    }

    /// Whether no live keys remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live_slot<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    let now = Instant::now();
    if slots.get(key).is_some_and(|s| !s.is_live(now)) {
        slots.remove(key);
    }
    slots.get_mut(key)
}

fn wrong_type(key: &str) -> KvError {
    KvError::Command(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

#[async_trait]
impl KvStore for InMemoryKv {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut slots = self.slots.lock().await;
        match live_slot(&mut slots, key) {
            Some(slot) => match &mut slot.value {
                Value::Str(s) => {
                    let next = s
                        .parse::<i64>()
                        .map_err(|_| {
                            KvError::Command("value is not an integer or out of range".into())
                        })?
                        + 1;
                    *s = next.to_string();
                    Ok(next)
                }
                Value::List(_) => Err(wrong_type(key)),
            },
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Str("1".into()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = live_slot(&mut slots, key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        Ok(live_slot(&mut slots, key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut slots = self.slots.lock().await;
        match live_slot(&mut slots, key) {
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut slots = self.slots.lock().await;
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> KvResult<()> {
        let mut slots = self.slots.lock().await;
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, values: &[String]) -> KvResult<()> {
        let mut slots = self.slots.lock().await;
        match live_slot(&mut slots, key) {
            Some(Slot {
                value: Value::List(list),
                ..
            }) => {
                list.extend(values.iter().cloned());
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        value: Value::List(values.iter().cloned().collect()),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn lrange_all(&self, key: &str) -> KvResult<Vec<String>> {
        let mut slots = self.slots.lock().await;
        match live_slot(&mut slots, key) {
            Some(Slot {
                value: Value::List(list),
                ..
            }) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn ltrim_front(&self, key: &str, count: usize) -> KvResult<()> {
        let mut slots = self.slots.lock().await;
        let emptied = match live_slot(&mut slots, key) {
            Some(Slot {
                value: Value::List(list),
                ..
            }) => {
                list.drain(..count.min(list.len()));
                list.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
            None => false,
        };
        // Redis deletes a list once its last element is trimmed away.
        if emptied {
            slots.remove(key);
        }
        Ok(())
    }

    async fn flush_db(&self) -> KvResult<()> {
        self.slots.lock().await.clear();
        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}

// ============================================================================
// Redis Store (Feature-gated)
// ============================================================================

/// Redis-backed store.
///
/// Holds one `ConnectionManager`, which reconnects on its own; each call works
/// on a cheap clone of it.
#[cfg(feature = "redis-backend")]
#[derive(Clone)]
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-backend")]
impl RedisKv {
    /// Connect to Redis at `url` (redis://host:port/db).
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[cfg(feature = "redis-backend")]
fn command_error(e: redis::RedisError) -> KvError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        KvError::Connection(e.to_string())
    } else {
        KvError::Command(e.to_string())
    }
}

#[cfg(feature = "redis-backend")]
#[async_trait]
impl KvStore for RedisKv {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2 for a missing key, -1 for a key without expiry.
        let secs = redis::cmd("TTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn del(&self, keys: &[String]) -> KvResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> KvResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(values)
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(command_error)
    }

    async fn lrange_all(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn ltrim_front(&self, key: &str, count: usize) -> KvResult<()> {
        if count == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("LTRIM")
            .arg(key)
            .arg(count)
            .arg(-1)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn flush_db(&self) -> KvResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn ping(&self) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let pong = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(command_error)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(KvError::Command(format!("unexpected PING reply: {pong}")))
        }
    }
}

// ============================================================================
// Store Factory
// ============================================================================

/// KV backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    /// In-memory store (single process).
    Memory,
    /// Redis.
    #[default]
    Redis,
}

/// Create a store for the given backend.
///
/// Without the `redis-backend` feature a Redis request falls back to the
/// in-memory store with a warning.
#[allow(unused_variables)]
pub async fn create_store(backend: KvBackend, url: &str) -> KvResult<Arc<dyn KvStore>> {
    match backend {
        KvBackend::Memory => Ok(Arc::new(InMemoryKv::new())),
        KvBackend::Redis => {
            #[cfg(feature = "redis-backend")]
            {
                let store = RedisKv::connect(url).await?;
                store.ping().await?;
                tracing::info!(backend = "redis", "KV store connected");
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis-backend"))]
            {
                tracing::warn!(
                    "Redis backend feature not enabled. Falling back to in-memory store. \
                     Enable with: cargo build --features redis-backend"
                );
                Ok(Arc::new(InMemoryKv::new()))
            }
        }
    }
}


// ============================================================================
// Redis Integration Tests (requires running Redis server)
// ============================================================================
