//! Ordered-sequence tracking wrapper.

use crate::error::{MemoryError, Result};
use crate::tracking::{Node, Step, TrackedValue};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A list whose in-place mutations re-synchronize the owning attribute.
///
/// Read access behaves like the underlying plain array; `push`, `insert` and
/// `extend` edit the store's local copy and trigger a sync of the topmost
/// attribute this list belongs to. Use [`detach`](SyncedList::detach) to get
/// an independent plain copy.
pub struct SyncedList {
    node: Node,
}

impl SyncedList {
    pub(crate) fn from_node(node: Node) -> Self {
        Self { node }
    }

    pub fn len(&self) -> usize {
        self.node
            .with_value(|v| v.as_array().map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`. Nested containers come back as live wrappers
    /// sharing this list's topmost attribute.
    pub fn get(&self, index: usize) -> Option<TrackedValue> {
        self.node
            .with_value(|v| {
                let item = v.as_array()?.get(index)?;
                Some(self.node.wrap_child(Step::Index(index), item))
            })
            .ok()
            .flatten()
    }

    /// Append an element and re-synchronize.
    pub fn push<T: Serialize>(&self, item: T) -> Result<()> {
        let item = serde_json::to_value(item)?;
        self.node.mutate(|v| match v {
            Value::Array(items) => {
                items.push(item);
                Ok(())
            }
            _ => Err(MemoryError::NotFound(self.node.name().to_string())),
        })
    }

    /// Insert an element at `index` (clamped to the current length) and
    /// re-synchronize.
    pub fn insert<T: Serialize>(&self, index: usize, item: T) -> Result<()> {
        let item = serde_json::to_value(item)?;
        self.node.mutate(|v| match v {
            Value::Array(items) => {
                let index = index.min(items.len());
                items.insert(index, item);
                Ok(())
            }
            _ => Err(MemoryError::NotFound(self.node.name().to_string())),
        })
    }

    /// Append every element, then re-synchronize once.
    pub fn extend<T: Serialize>(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items = items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.node.mutate(|v| match v {
            Value::Array(existing) => {
                existing.extend(items);
                Ok(())
            }
            _ => Err(MemoryError::NotFound(self.node.name().to_string())),
        })
    }

    /// A plain, independent deep copy of the current elements. Mutating the
    /// result affects neither the store nor the backend.
    pub fn detach(&self) -> Vec<Value> {
        self.node
            .with_value(|v| v.as_array().cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl fmt::Debug for SyncedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SyncedList").field(&self.detach()).finish()
    }
}
