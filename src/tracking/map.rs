//! Key/value-mapping tracking wrapper.

use crate::error::{MemoryError, Result};
use crate::tracking::{Node, Step, TrackedValue};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A mapping whose in-place mutations re-synchronize the owning attribute.
///
/// Read access behaves like the underlying plain object; `insert` and
/// `update` edit the store's local copy and trigger a sync of the topmost
/// attribute this map belongs to. Use [`detach`](SyncedMap::detach) for an
/// independent plain copy.
pub struct SyncedMap {
    node: Node,
}

impl SyncedMap {
    pub(crate) fn from_node(node: Node) -> Self {
        Self { node }
    }

    pub fn len(&self) -> usize {
        self.node
            .with_value(|v| v.as_object().map(Map::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.node
            .with_value(|v| v.as_object().map(|m| m.contains_key(key)).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.node
            .with_value(|v| {
                v.as_object()
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Value under `key`. Nested containers come back as live wrappers
    /// sharing this map's topmost attribute.
    pub fn get(&self, key: &str) -> Option<TrackedValue> {
        self.node
            .with_value(|v| {
                let item = v.as_object()?.get(key)?;
                Some(self.node.wrap_child(Step::Key(key.to_string()), item))
            })
            .ok()
            .flatten()
    }

    /// Assign `key` and re-synchronize.
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)?;
        self.node.mutate(|v| match v {
            Value::Object(map) => {
                map.insert(key, value);
                Ok(())
            }
            _ => Err(MemoryError::NotFound(self.node.name().to_string())),
        })
    }

    /// Merge every entry, then re-synchronize once.
    pub fn update<T: Serialize>(
        &self,
        entries: impl IntoIterator<Item = (String, T)>,
    ) -> Result<()> {
        let entries = entries
            .into_iter()
            .map(|(k, v)| serde_json::to_value(v).map(|v| (k, v)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.node.mutate(|v| match v {
            Value::Object(map) => {
                for (k, v) in entries {
                    map.insert(k, v);
                }
                Ok(())
            }
            _ => Err(MemoryError::NotFound(self.node.name().to_string())),
        })
    }

    /// A plain, independent deep copy of the current entries. Mutating the
    /// result affects neither the store nor the backend.
    pub fn detach(&self) -> Map<String, Value> {
        self.node
            .with_value(|v| v.as_object().cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl fmt::Debug for SyncedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SyncedMap").field(&self.detach()).finish()
    }
}
