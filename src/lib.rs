//! # Redis Memory
//!
//! A synchronized key-value store that uses Redis as a shared memory
//! backend, letting independently-running processes share runtime state.
//!
//! ## Core Concepts
//!
//! - **Local mirror**: every store keeps its attributes locally; reads
//!   degrade to the mirror when the backend is down
//! - **Pending queue**: writes that cannot reach the backend are queued and
//!   delivered by a background worker, retrying until they succeed
//! - **Last-writer-wins**: every mutation is timestamped; conflicts resolve
//!   to the greater timestamp, on read, sync and queue drain alike
//! - **Tracking containers**: lists and maps are handed out as wrappers that
//!   re-synchronize their top-level attribute on in-place mutation
//!
//! ## Example
//!
//! ```ignore
//! use redis_memory::{Memory, MemoryConfig};
//! use serde_json::json;
//!
//! let mem = Memory::open(MemoryConfig {
//!     host: "localhost".into(),
//!     ..Default::default()
//! });
//!
//! mem.set("counter", 42)?;
//! mem.set("tags", json!(["a", "b"]))?;
//!
//! // In-place mutation re-syncs the whole attribute
//! mem.get("tags")?.into_list().unwrap().push("c")?;
//!
//! mem.close();
//! ```

pub mod backend;
pub mod error;
pub mod store;
pub mod tracking;
pub mod types;

// Re-exports
pub use backend::{KvBackend, KvConnection, MemoryConfig, RedisBackend};
pub use error::{MemoryError, Result};
pub use store::Memory;
pub use tracking::{SyncedList, SyncedMap, TrackedValue};
pub use types::{Payload, Timestamp};
