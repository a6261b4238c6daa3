use serde_json::{Map, Value};
use shared::StatePath;

use crate::{
    error::{value_kind, DeltaError},
    store::{lookup, merge_at, merge_value},
};

/// Partial state document describing only the fields that changed.
///
/// Top-level keys containing a `/` are state paths (the leading slash is
/// optional, as for [`StatePath::parse`]) and place their value at that
/// path; any other key is a nested partial document merged under that key. Entries are folded into one tree when the delta is built, so a delta
/// reads the same way the store does.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    tree: Value,
}

impl Default for Delta {
    fn default() -> Self {
        Self {
            tree: Value::Object(Map::new()),
        }
    }
}

impl Delta {
    pub fn new(value: Value) -> Result<Self, DeltaError> {
        let Value::Object(entries) = value else {
            return Err(DeltaError::NotAnObject {
                kind: value_kind(&value),
            });
        };
        let mut delta = Self::default();
        for (key, value) in entries {
            delta.insert_entry(&key, value)?;
        }
        Ok(delta)
    }

    /// A delta that sets one path.
    pub fn at(path: &StatePath, value: Value) -> Result<Self, DeltaError> {
        Self::default().with(path, value)
    }

    /// Nests `partial` under `root`, as a status update lands under the
    /// configured status root.
    pub fn nested(root: &StatePath, partial: Value) -> Result<Self, DeltaError> {
        Self::at(root, partial)
    }

    pub fn with(mut self, path: &StatePath, value: Value) -> Result<Self, DeltaError> {
        if path.is_root() && !value.is_object() {
            return Err(DeltaError::RootNotObject);
        }
        merge_at(&mut self.tree, path.segments(), &value);
        Ok(self)
    }

    fn insert_entry(&mut self, key: &str, value: Value) -> Result<(), DeltaError> {
        if key.contains('/') {
            let path = StatePath::parse(key).map_err(|err| DeltaError::InvalidPath {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
            if path.is_root() && !value.is_object() {
                return Err(DeltaError::RootNotObject);
            }
            merge_at(&mut self.tree, path.segments(), &value);
        } else {
            let mut partial = Map::new();
            partial.insert(key.to_string(), value);
            merge_value(&mut self.tree, &Value::Object(partial));
        }
        Ok(())
    }

    /// The value this delta sets at `path`, or `None` if it does not touch it.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = StatePath::parse(path).ok()?;
        self.get_path(&path)
    }

    pub fn get_path(&self, path: &StatePath) -> Option<&Value> {
        lookup(&self.tree, path.segments())
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn touches(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Top-level keys of the folded tree, e.g. `printer_state`.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.tree
            .as_object()
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.tree.as_object().map_or(true, Map::is_empty)
    }

    pub fn as_value(&self) -> &Value {
        &self.tree
    }

    pub fn into_value(self) -> Value {
        self.tree
    }
}

impl TryFrom<Value> for Delta {
    type Error = DeltaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
#[path = "tests/delta_tests.rs"]
mod tests;
