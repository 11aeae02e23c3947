//! Backend connector.
//!
//! Each operation opens a short-lived connection with a small fixed timeout;
//! nothing is pooled across calls, so backend restarts and migrations are
//! tolerated transparently. Every backend-library error is normalized to
//! [`MemoryError::Unavailable`], so callers never see redis-specific errors.

use crate::error::{MemoryError, Result};
use redis::Commands;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Default connect/read/write timeout for backend operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection parameters for a [`Memory`](crate::Memory) instance.
///
/// Environment variables override explicit values at open time:
///
/// - `REDIS_HOST`: backend hostname (default `redis`)
/// - `REDIS_PORT`: backend port (default `6379`)
/// - `REDIS_PREFIX`: key prefix (default `memory:`)
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Backend hostname.
    pub host: String,

    /// Backend port.
    pub port: u16,

    /// Prefix applied to every key belonging to this store.
    pub prefix: String,

    /// Optional namespace inserted between prefix and attribute name
    /// (`prefix + namespace + ":" + name`). Used to isolate one
    /// conversation's memory from another's.
    pub namespace: Option<String>,

    /// Connect and per-operation timeout.
    pub timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            prefix: "memory:".to_string(),
            namespace: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MemoryConfig {
    /// Namespace keys by an identifier (e.g. a conversation id).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Apply environment overrides. Environment wins over explicit values.
    pub fn apply_env(&mut self) {
        if let Ok(host) = env::var("REDIS_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("REDIS_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(prefix) = env::var("REDIS_PREFIX") {
            self.prefix = prefix;
        }
    }

    /// The full key prefix, including the namespace when set.
    pub fn effective_prefix(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}{}:", self.prefix, ns),
            None => self.prefix.clone(),
        }
    }
}

/// A key-value backend usable as the shared synchronization medium.
///
/// The production implementation is [`RedisBackend`]; any store offering
/// get/set/delete/scan-by-prefix with bounded-latency connects suffices.
pub trait KvBackend: Send + Sync {
    /// Open a fresh connection, verifying liveness.
    fn connect(&self) -> Result<Box<dyn KvConnection>>;
}

/// A single short-lived backend connection.
pub trait KvConnection {
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    fn set(&mut self, key: &str, raw: &str) -> Result<()>;

    fn delete(&mut self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`.
    fn scan(&mut self, prefix: &str) -> Result<Vec<String>>;
}

/// Redis-backed connector.
pub struct RedisBackend {
    host: String,
    port: u16,
    timeout: Duration,
}

impl RedisBackend {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
        }
    }
}

impl KvBackend for RedisBackend {
    fn connect(&self) -> Result<Box<dyn KvConnection>> {
        let client =
            redis::Client::open((self.host.as_str(), self.port)).map_err(unavailable)?;
        let mut conn = client
            .get_connection_with_timeout(self.timeout)
            .map_err(unavailable)?;
        conn.set_read_timeout(Some(self.timeout)).map_err(unavailable)?;
        conn.set_write_timeout(Some(self.timeout)).map_err(unavailable)?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(unavailable)?;
        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: redis::Connection,
}

impl KvConnection for RedisConnection {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.conn.get(key).map_err(unavailable)
    }

    fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        self.conn.set(key, raw).map_err(unavailable)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.conn.del(key).map_err(unavailable)
    }

    fn scan(&mut self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", prefix);
        let iter = self
            .conn
            .scan_match::<_, String>(pattern)
            .map_err(unavailable)?;
        Ok(iter.collect())
    }
}

fn unavailable(e: redis::RedisError) -> MemoryError {
    debug!("redis error: {}", e);
    MemoryError::Unavailable
}
