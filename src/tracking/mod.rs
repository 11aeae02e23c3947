//! Mutation-tracking container wrappers.
//!
//! Structured values read from or written to the store are handed out as
//! [`SyncedList`] / [`SyncedMap`] wrappers. In-place mutation through a
//! wrapper edits the store's local copy and re-synchronizes the owning
//! top-level attribute, however deeply the wrapper is nested.

mod list;
mod map;
mod node;

pub use list::SyncedList;
pub use map::SyncedMap;

pub(crate) use node::{wrap, Node, Step};

use serde_json::Value;

/// A value handed out by the store.
///
/// Scalars are plain copies; lists and maps are live wrappers that
/// re-synchronize the owning attribute when mutated in place.
#[derive(Debug)]
pub enum TrackedValue {
    Scalar(Value),
    List(SyncedList),
    Map(SyncedMap),
}

impl TrackedValue {
    /// A fully plain, independent deep copy (recursively unwrapped).
    pub fn detach(&self) -> Value {
        match self {
            TrackedValue::Scalar(value) => value.clone(),
            TrackedValue::List(list) => Value::Array(list.detach()),
            TrackedValue::Map(map) => Value::Object(map.detach()),
        }
    }

    pub fn as_list(&self) -> Option<&SyncedList> {
        match self {
            TrackedValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SyncedMap> {
        match self {
            TrackedValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<SyncedList> {
        match self {
            TrackedValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<SyncedMap> {
        match self {
            TrackedValue::Map(map) => Some(map),
            _ => None,
        }
    }
}
