use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared::StatePath;
use tracing::debug;

use crate::delta::Delta;

/// The latest known value of every subscribed printer field.
///
/// Reads take the read lock only, so they are safe from any thread,
/// including from inside [`crate::Consumer::consume`].
pub struct StateStore {
    tree: RwLock<Value>,
    revision: AtomicU64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Value::Object(Map::new())),
            revision: AtomicU64::new(0),
        }
    }

    /// Value at `path`, or `Value::Null` when any segment is missing.
    pub fn get(&self, path: &str) -> Value {
        match StatePath::parse(path) {
            Ok(path) => self.get_path(&path),
            Err(err) => {
                debug!(%path, %err, "state read with unparseable path");
                Value::Null
            }
        }
    }

    pub fn get_path(&self, path: &StatePath) -> Value {
        let tree = self.tree.read();
        lookup(&tree, path.segments()).cloned().unwrap_or(Value::Null)
    }

    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        match self.get(path) {
            Value::Null => None,
            value => serde_json::from_value(value).ok(),
        }
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).as_f64()
    }

    /// Integer view of a numeric field; floats are truncated toward zero.
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        let value = self.get(path);
        value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))
    }

    pub fn contains(&self, path: &str) -> bool {
        !self.get(path).is_null()
    }

    pub fn snapshot(&self) -> Value {
        self.tree.read().clone()
    }

    /// Number of merges applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Applies `delta` under one write lock: readers see the tree either
    /// entirely before or entirely after it.
    pub fn merge(&self, delta: &Delta) {
        let mut tree = self.tree.write();
        merge_value(&mut tree, delta.as_value());
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

pub(crate) fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Objects merge key by key; anything else replaces the target.
pub(crate) fn merge_value(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(update)) => {
            for (key, value) in update {
                match existing.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}

pub(crate) fn merge_at(root: &mut Value, segments: &[String], incoming: &Value) {
    let mut node = root;
    for segment in segments {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            unreachable!("node was just replaced with an object");
        };
        node = map.entry(segment.clone()).or_insert(Value::Null);
    }
    merge_value(node, incoming);
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
