//! The `Memory` store: local mirror, pending-write queue, background flush
//! loop and last-writer-wins reconciliation.

use crate::backend::{KvBackend, KvConnection, MemoryConfig, RedisBackend};
use crate::error::{MemoryError, Result};
use crate::tracking::{self, TrackedValue};
use crate::types::{Payload, Timestamp};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Poll period of the background flush loop.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between reconnection attempts while draining the queue.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Local store state. One lock around the triple: conflict resolution is
/// timestamp-based, the lock only guards the maps themselves.
struct State {
    /// Name -> shared root value. Tracking containers mutate through the
    /// shared root, so `sync` always observes the current local value.
    attributes: HashMap<String, Arc<RwLock<Value>>>,

    /// Name -> last known timestamp (local write or last reconciliation).
    last_modified: HashMap<String, Timestamp>,

    /// Pending writes awaiting delivery, in arrival order. No deduplication:
    /// superseded entries are discarded at drain time by timestamp.
    queue: VecDeque<(String, Payload)>,
}

/// State shared between the store handle, its tracking containers and the
/// background flush worker.
pub(crate) struct Shared {
    backend: Box<dyn KvBackend>,
    prefix: String,
    state: Mutex<State>,
    /// Whether the backend has ever been reached. Gates the final drain at
    /// shutdown: if the backend was never seen, closing does not block.
    reached: AtomicBool,
}

impl Shared {
    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn mark_reached(&self) {
        self.reached.store(true, Ordering::Relaxed);
    }

    fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn enqueue(&self, name: &str, payload: Payload) {
        self.state.lock().queue.push_back((name.to_string(), payload));
    }

    // --- Read path ---

    fn get(self: &Arc<Self>, name: &str) -> Result<TrackedValue> {
        let mut conn = match self.backend.connect() {
            Ok(conn) => conn,
            Err(_) => return self.get_local(name),
        };

        match conn.get(&self.key(name)) {
            Ok(Some(raw)) => {
                self.mark_reached();
                let payload = Payload::from_raw(&raw)
                    .map_err(|e| MemoryError::Serialization(e.to_string()))?;
                let root = Arc::new(RwLock::new(payload.value));
                {
                    let mut state = self.state.lock();
                    state.attributes.insert(name.to_string(), Arc::clone(&root));
                    state
                        .last_modified
                        .insert(name.to_string(), payload.last_modified);
                }
                Ok(tracking::wrap(Arc::clone(self), name, root))
            }
            // Backend is authoritative when reachable
            Ok(None) => Err(MemoryError::NotFound(name.to_string())),
            Err(_) => self.get_local(name),
        }
    }

    /// Fallback when the backend is unreachable: serve the local mirror.
    fn get_local(self: &Arc<Self>, name: &str) -> Result<TrackedValue> {
        warn!("backend unavailable, serving `{}` from local cache", name);
        let root = self
            .state
            .lock()
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(name.to_string()))?;
        // A stored null is the deletion sentinel, not a value
        if root.read().is_null() {
            return Err(MemoryError::NotFound(name.to_string()));
        }
        Ok(tracking::wrap(Arc::clone(self), name, root))
    }

    // --- Write path ---

    fn set(&self, name: &str, value: Value) -> Result<()> {
        let root = Arc::new(RwLock::new(value.clone()));
        let timestamp = Timestamp::now();
        {
            let mut state = self.state.lock();
            state.attributes.insert(name.to_string(), root);
            state.last_modified.insert(name.to_string(), timestamp);
        }
        let payload = Payload::new(value, timestamp);

        match self.backend.connect() {
            Ok(mut conn) => {
                if self.write_payload(conn.as_mut(), name, &payload).is_err() {
                    warn!("backend write failed, queuing `{}`", name);
                    self.enqueue(name, payload);
                }
            }
            Err(_) => {
                warn!("backend unavailable, queuing `{}`", name);
                self.enqueue(name, payload);
            }
        }
        Ok(())
    }

    fn write_payload(
        &self,
        conn: &mut dyn KvConnection,
        name: &str,
        payload: &Payload,
    ) -> Result<()> {
        let raw = payload.to_raw()?;
        conn.set(&self.key(name), &raw)?;
        self.mark_reached();
        Ok(())
    }

    // --- Delete path ---

    fn delete(&self, name: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.attributes.contains_key(name) {
                return Err(MemoryError::NotFound(name.to_string()));
            }
            // Both maps leave together
            state.attributes.remove(name);
            state.last_modified.remove(name);
        }

        let enqueue_tombstone = |store: &Self| {
            warn!("backend unavailable, queuing deletion of `{}`", name);
            store.enqueue(name, Payload::tombstone(Timestamp::now()));
        };

        match self.backend.connect() {
            Ok(mut conn) => match conn.delete(&self.key(name)) {
                Ok(()) => self.mark_reached(),
                Err(_) => enqueue_tombstone(self),
            },
            Err(_) => enqueue_tombstone(self),
        }
        Ok(())
    }

    // --- Reconciliation ---

    /// Reconcile one attribute with the backend, last-writer-wins.
    pub(crate) fn sync_name(&self, name: &str) -> Result<()> {
        let (local_value, local_ts) = {
            let state = self.state.lock();
            let root = state
                .attributes
                .get(name)
                .ok_or_else(|| MemoryError::NotFound(name.to_string()))?;
            let value = root.read().clone();
            let ts = state
                .last_modified
                .get(name)
                .copied()
                .unwrap_or(Timestamp(0));
            (value, ts)
        };
        let payload = Payload::new(local_value, local_ts);

        let mut conn = match self.backend.connect() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("backend unavailable, queuing sync of `{}`", name);
                self.enqueue(name, payload);
                return Ok(());
            }
        };

        let backend_entry = match conn.get(&self.key(name)) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("backend read failed, queuing sync of `{}`", name);
                self.enqueue(name, payload);
                return Ok(());
            }
        };

        match backend_entry {
            // Absent in backend: local wins by default
            None => {
                if self.write_payload(conn.as_mut(), name, &payload).is_err() {
                    self.enqueue(name, payload);
                }
            }
            Some(raw) => {
                // Unparseable backend data loses to any local write
                let remote = Payload::from_raw(&raw)
                    .unwrap_or_else(|_| Payload::new(Value::Null, Timestamp(0)));
                if local_ts >= remote.last_modified {
                    // Local wins ties
                    if self.write_payload(conn.as_mut(), name, &payload).is_err() {
                        self.enqueue(name, payload);
                    }
                } else {
                    // Backend is newer: overwrite the local mirror
                    debug!("backend has newer `{}`, updating local copy", name);
                    let mut state = self.state.lock();
                    state
                        .attributes
                        .insert(name.to_string(), Arc::new(RwLock::new(remote.value)));
                    state
                        .last_modified
                        .insert(name.to_string(), remote.last_modified);
                }
            }
        }
        Ok(())
    }

    // --- Queue drain ---

    /// Drain the pending queue in arrival order, blocking until a backend
    /// connection succeeds. With a stop receiver, the connection retry loop
    /// aborts when stop is signalled (queue left intact); without one, this
    /// intentionally does not give up while entries remain.
    fn drain(&self, stop: Option<&Receiver<()>>) {
        // Nothing to deliver: don't sit in the connect loop
        if self.queue_len() == 0 {
            return;
        }
        'reconnect: loop {
            let mut conn = loop {
                match self.backend.connect() {
                    Ok(conn) => break conn,
                    Err(_) => match stop {
                        Some(rx) => match rx.recv_timeout(RETRY_INTERVAL) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => return,
                        },
                        None => thread::sleep(RETRY_INTERVAL),
                    },
                }
            };

            loop {
                let entry = self.state.lock().queue.pop_front();
                let Some((name, payload)) = entry else { return };
                match self.apply_queued(conn.as_mut(), &name, &payload) {
                    Ok(()) => self.mark_reached(),
                    Err(_) => {
                        // Connection died mid-drain: put the entry back at
                        // the head and reconnect, order preserved
                        self.state.lock().queue.push_front((name, payload));
                        continue 'reconnect;
                    }
                }
            }
        }
    }

    /// Deliver one queued entry, honoring newer backend data.
    fn apply_queued(
        &self,
        conn: &mut dyn KvConnection,
        name: &str,
        payload: &Payload,
    ) -> Result<()> {
        let key = self.key(name);

        let backend_ts = match conn.get(&key)? {
            Some(raw) => Payload::from_raw(&raw)
                .map(|p| p.last_modified)
                .unwrap_or(Timestamp(0)),
            None => Timestamp(0),
        };

        // Backend already has newer data: discard the queued entry
        if backend_ts > payload.last_modified {
            debug!("discarding stale queued write for `{}`", name);
            return Ok(());
        }

        if payload.is_tombstone() {
            conn.delete(&key)
        } else {
            match payload.to_raw() {
                Ok(raw) => conn.set(&key, &raw),
                Err(e) => {
                    warn!("dropping unserializable queued write for `{}`: {}", name, e);
                    Ok(())
                }
            }
        }
    }

    // --- Preload ---

    /// Best-effort bulk load of every key under this store's prefix.
    fn preload(&self) {
        let mut conn = match self.backend.connect() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("backend unavailable, cannot preload attributes");
                return;
            }
        };
        let keys = match conn.scan(&self.prefix) {
            Ok(keys) => keys,
            Err(_) => {
                warn!("backend scan failed, cannot preload attributes");
                return;
            }
        };

        for key in keys {
            let Some(name) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            let raw = match conn.get(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(_) => {
                    warn!("failed to load key {}", key);
                    continue;
                }
            };
            match Payload::from_raw(&raw) {
                Ok(payload) => {
                    let mut state = self.state.lock();
                    state
                        .attributes
                        .insert(name.to_string(), Arc::new(RwLock::new(payload.value)));
                    state
                        .last_modified
                        .insert(name.to_string(), payload.last_modified);
                    drop(state);
                    self.mark_reached();
                }
                Err(e) => warn!("failed to load key {}: {}", key, e),
            }
        }
    }
}

/// A synchronized key-value store using a shared Redis backend.
///
/// Each `Memory` holds a local mirror of its attributes. Writes are mirrored
/// to the backend immediately; when the backend is unreachable they are
/// queued and retried by a background worker until delivered. Reads prefer
/// the backend and degrade to the local mirror.
///
/// # Example
///
/// ```ignore
/// use redis_memory::{Memory, MemoryConfig};
/// use serde_json::json;
///
/// let mem = Memory::open(MemoryConfig::default());
/// mem.set("foo", 42)?;
/// mem.set("bar", json!({"a": 1}))?;
///
/// let other = Memory::open(MemoryConfig::default());
/// assert_eq!(other.get("foo")?.detach(), json!(42));
/// ```
pub struct Memory {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Memory {
    /// Open a store against the Redis backend described by `config`.
    ///
    /// Environment overrides (`REDIS_HOST`, `REDIS_PORT`, `REDIS_PREFIX`)
    /// are applied here and win over explicit values. Never fails: preload
    /// is best-effort and an unreachable backend just leaves the local
    /// mirror empty.
    pub fn open(mut config: MemoryConfig) -> Self {
        config.apply_env();
        let backend = Box::new(RedisBackend::new(&config));
        Self::open_with_backend(config, backend)
    }

    /// Open a store over any [`KvBackend`] implementation.
    pub fn open_with_backend(config: MemoryConfig, backend: Box<dyn KvBackend>) -> Self {
        let shared = Arc::new(Shared {
            backend,
            prefix: config.effective_prefix(),
            state: Mutex::new(State {
                attributes: HashMap::new(),
                last_modified: HashMap::new(),
                queue: VecDeque::new(),
            }),
            reached: AtomicBool::new(false),
        });

        let (stop_tx, stop_rx) = bounded(0);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || background_flush_loop(worker_shared, stop_rx));

        shared.preload();

        Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Fetch an attribute.
    ///
    /// The backend is authoritative when reachable; when it is not, the
    /// local mirror is served instead. Fails with `NotFound` when the
    /// attribute exists in neither.
    pub fn get(&self, name: &str) -> Result<TrackedValue> {
        ensure_user_name(name)?;
        self.shared.get(name)
    }

    /// Store an attribute.
    ///
    /// The local mirror is updated immediately; delivery to the backend is
    /// immediate when reachable, queued otherwise. A serialization failure
    /// rejects the write with no state change.
    pub fn set<T: Serialize>(&self, name: &str, value: T) -> Result<()> {
        ensure_user_name(name)?;
        let value = serde_json::to_value(value)?;
        self.shared.set(name, value)
    }

    /// Delete an attribute locally and from the backend (queued as a
    /// tombstone when the backend is unreachable).
    pub fn delete(&self, name: &str) -> Result<()> {
        ensure_user_name(name)?;
        self.shared.delete(name)
    }

    /// Reconcile one attribute with the backend, last-writer-wins.
    /// Invoked automatically by tracking containers after in-place edits.
    pub fn sync(&self, name: &str) -> Result<()> {
        ensure_user_name(name)?;
        self.shared.sync_name(name)
    }

    /// Drain the pending queue, blocking until the backend accepts every
    /// entry. Normally unnecessary: the background worker flushes the queue
    /// on its own.
    pub fn flush(&self) {
        self.shared.drain(None);
    }

    /// Number of writes still awaiting delivery.
    pub fn pending_writes(&self) -> usize {
        self.shared.queue_len()
    }

    /// Whether the backend has been reached at least once.
    pub fn backend_seen(&self) -> bool {
        self.shared.reached.load(Ordering::Relaxed)
    }

    /// Graceful shutdown: stop the background worker, then, if the backend
    /// was ever reachable, block draining whatever is still queued. If the
    /// backend was never seen, nothing is flushed and this returns promptly.
    pub fn close(&self) {
        self.stop_worker();
        if self.backend_seen() && self.shared.queue_len() > 0 {
            self.shared.drain(None);
        }
    }

    fn stop_worker(&self) {
        // Dropping the sender disconnects the channel, which the worker
        // observes as the stop signal
        self.stop_tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        // No blocking final drain here; call `close` for that
        self.stop_worker();
    }
}

/// Background worker: poll every second, drain whenever the queue is
/// non-empty, stop when the channel disconnects or a stop is signalled.
fn background_flush_loop(shared: Arc<Shared>, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(FLUSH_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {
                if shared.queue_len() > 0 {
                    shared.drain(Some(&stop));
                }
            }
            _ => break,
        }
    }
}

fn ensure_user_name(name: &str) -> Result<()> {
    if name.starts_with('_') {
        return Err(MemoryError::ReservedName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_rejected() {
        assert!(ensure_user_name("foo").is_ok());
        assert!(matches!(
            ensure_user_name("_queue"),
            Err(MemoryError::ReservedName(_))
        ));
    }
}
