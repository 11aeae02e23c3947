//! Shared test helpers: an in-memory backend with an availability switch.
#![allow(dead_code)] // not every binary uses every helper

use parking_lot::Mutex;
use redis_memory::{KvBackend, KvConnection, Memory, MemoryConfig, MemoryError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// In-memory key-value backend. Cloning shares the underlying data, so two
/// `Memory` instances opened on clones see the same "server". Flipping
/// `set_available(false)` makes every connect and operation fail the way an
/// unreachable backend would.
#[derive(Clone)]
pub struct TestBackend {
    data: Arc<Mutex<BTreeMap<String, String>>>,
    available: Arc<AtomicBool>,
    failing_sets: Arc<AtomicUsize>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(BTreeMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            failing_sets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` set operations fail as if the connection died
    /// mid-use, while connects keep succeeding.
    pub fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, raw: &str) {
        self.data.lock().insert(key.to_string(), raw.to_string());
    }

    pub fn remove_raw(&self, key: &str) {
        self.data.lock().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }
}

impl KvBackend for TestBackend {
    fn connect(&self) -> Result<Box<dyn KvConnection>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MemoryError::Unavailable);
        }
        Ok(Box::new(TestConnection {
            data: Arc::clone(&self.data),
            available: Arc::clone(&self.available),
            failing_sets: Arc::clone(&self.failing_sets),
        }))
    }
}

struct TestConnection {
    data: Arc<Mutex<BTreeMap<String, String>>>,
    available: Arc<AtomicBool>,
    failing_sets: Arc<AtomicUsize>,
}

impl TestConnection {
    fn check(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MemoryError::Unavailable);
        }
        Ok(())
    }

    /// Consume one injected set failure, if any remain.
    fn take_set_failure(&self) -> bool {
        self.failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl KvConnection for TestConnection {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        self.check()?;
        if self.take_set_failure() {
            return Err(MemoryError::Unavailable);
        }
        self.data.lock().insert(key.to_string(), raw.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.check()?;
        self.data.lock().remove(key);
        Ok(())
    }

    fn scan(&mut self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Open a `Memory` on a clone of the given backend with the default prefix.
pub fn open_memory(backend: &TestBackend) -> Memory {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
    Memory::open_with_backend(MemoryConfig::default(), Box::new(backend.clone()))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}
