use serde_json::Value;
use shared::{protocol::STATUS_UPDATE_NOTIFICATION, StatePath};
use state_sync::{Delta, DeltaError};

/// Turns daemon notifications into state deltas.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    status_root: StatePath,
    events_root: StatePath,
}

impl NotificationRouter {
    pub fn new(status_root: StatePath) -> Self {
        Self {
            status_root,
            events_root: StatePath::from_segments(["events"]),
        }
    }

    pub fn status_root(&self) -> &StatePath {
        &self.status_root
    }

    /// `notify_status_update` carries `[status, eventtime]`; the status
    /// object lands under the status root. Object params are already a
    /// delta. Anything else is recorded under `/events/<method>`.
    pub fn route(&self, method: &str, params: Value) -> Result<Delta, DeltaError> {
        if method == STATUS_UPDATE_NOTIFICATION {
            let status = match params {
                Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
                other => other,
            };
            return self.status(status);
        }
        match params {
            params @ Value::Object(_) => Delta::new(params),
            params => Delta::at(&self.events_root.join(method), params),
        }
    }

    /// Initial snapshot carried in a subscribe reply's `status` member.
    pub fn subscribe_reply(&self, result: &Value) -> Option<Result<Delta, DeltaError>> {
        let status = result.get("status")?;
        Some(self.status(status.clone()))
    }

    fn status(&self, status: Value) -> Result<Delta, DeltaError> {
        if !status.is_object() {
            return Err(DeltaError::NotAnObject {
                kind: "non-object status",
            });
        }
        Delta::nested(&self.status_root, status)
    }
}

#[cfg(test)]
#[path = "tests/routing_tests.rs"]
mod tests;
