use serde::Deserialize;
use shared::protocol::GCODE_SCRIPT_METHOD;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_DAEMON_URL: &str = "ws://127.0.0.1:7125/websocket";
pub const DEFAULT_STATUS_ROOT: &str = "/printer_state";
pub const DEFAULT_MAX_QUEUED_COMMANDS: usize = 32;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// What `send_command` does while the session is (re)connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Reject the command; stale motion commands never run after an outage.
    #[default]
    Drop,
    /// Buffer the command and write it right after the next connect.
    #[serde(alias = "queue")]
    QueueAndFlush,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub command_method: String,
    pub status_root: String,
    pub subscribe_objects: Vec<String>,
    pub queue_policy: QueuePolicy,
    pub max_queued_commands: usize,
    /// Frames that may wait on a stalled socket before writes are refused.
    pub outbound_capacity: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DAEMON_URL.to_string(),
            command_method: GCODE_SCRIPT_METHOD.to_string(),
            status_root: DEFAULT_STATUS_ROOT.to_string(),
            subscribe_objects: ["extruder", "heater_bed", "print_stats", "toolhead", "webhooks"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            queue_policy: QueuePolicy::Drop,
            max_queued_commands: DEFAULT_MAX_QUEUED_COMMANDS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }
}
