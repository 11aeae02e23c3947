//! Shared plumbing for tracking containers.
//!
//! A wrapper addresses its slice of the attribute through the attribute's
//! shared root value plus a path of index/key steps. Mutating through the
//! wrapper therefore edits the same value the store will serialize on the
//! next synchronization, and every wrapper carries the topmost attribute
//! name it must re-synchronize, however deep its path.

use crate::error::{MemoryError, Result};
use crate::store::Shared;
use crate::tracking::{SyncedList, SyncedMap, TrackedValue};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// One step from a container to a nested element.
#[derive(Clone, Debug)]
pub(crate) enum Step {
    Index(usize),
    Key(String),
}

/// Back-reference from a wrapper to its owning store and attribute.
///
/// Deliberately neither `Clone` nor `Serialize`: a wrapper must not be handed
/// to generic deep-copy or serialization machinery while it holds a live
/// store reference. Use `detach` for a plain copy.
pub(crate) struct Node {
    store: Arc<Shared>,
    name: String,
    root: Arc<RwLock<Value>>,
    path: Vec<Step>,
}

impl Node {
    pub(crate) fn new(store: Arc<Shared>, name: String, root: Arc<RwLock<Value>>) -> Self {
        Self {
            store,
            name,
            root,
            path: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// A node one step deeper, sharing root and topmost name.
    pub(crate) fn child(&self, step: Step) -> Self {
        let mut path = self.path.clone();
        path.push(step);
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            root: Arc::clone(&self.root),
            path,
        }
    }

    /// Wrap the element `step` below this node, given its current value.
    pub(crate) fn wrap_child(&self, step: Step, value: &Value) -> TrackedValue {
        match value {
            Value::Array(_) => TrackedValue::List(SyncedList::from_node(self.child(step))),
            Value::Object(_) => TrackedValue::Map(SyncedMap::from_node(self.child(step))),
            scalar => TrackedValue::Scalar(scalar.clone()),
        }
    }

    /// Read access to the value this node addresses.
    ///
    /// Fails with `NotFound` if the path no longer resolves (the attribute
    /// was replaced or restructured since this wrapper was created).
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> Result<R> {
        let root = self.root.read();
        let value =
            locate(&root, &self.path).ok_or_else(|| MemoryError::NotFound(self.name.clone()))?;
        Ok(f(value))
    }

    /// Apply an in-place edit, then re-synchronize the topmost attribute.
    pub(crate) fn mutate(&self, f: impl FnOnce(&mut Value) -> Result<()>) -> Result<()> {
        {
            let mut root = self.root.write();
            let value = locate_mut(&mut root, &self.path)
                .ok_or_else(|| MemoryError::NotFound(self.name.clone()))?;
            f(value)?;
        }
        // Root lock released before syncing; sync re-reads the shared root.
        self.store.sync_name(&self.name)
    }
}

/// Wrap an attribute's shared root for handing out to callers.
pub(crate) fn wrap(store: Arc<Shared>, name: &str, root: Arc<RwLock<Value>>) -> TrackedValue {
    let is_list = {
        let guard = root.read();
        match &*guard {
            Value::Array(_) => true,
            Value::Object(_) => false,
            scalar => return TrackedValue::Scalar(scalar.clone()),
        }
    };
    let node = Node::new(store, name.to_string(), root);
    if is_list {
        TrackedValue::List(SyncedList::from_node(node))
    } else {
        TrackedValue::Map(SyncedMap::from_node(node))
    }
}

fn locate<'a>(mut value: &'a Value, path: &[Step]) -> Option<&'a Value> {
    for step in path {
        value = match step {
            Step::Index(i) => value.as_array()?.get(*i)?,
            Step::Key(k) => value.as_object()?.get(k)?,
        };
    }
    Some(value)
}

fn locate_mut<'a>(mut value: &'a mut Value, path: &[Step]) -> Option<&'a mut Value> {
    for step in path {
        value = match step {
            Step::Index(i) => value.as_array_mut()?.get_mut(*i)?,
            Step::Key(k) => value.as_object_mut()?.get_mut(k)?,
        };
    }
    Some(value)
}
