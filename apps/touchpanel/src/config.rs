use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::{
    settings::{
        DEFAULT_DAEMON_URL, DEFAULT_MAX_QUEUED_COMMANDS, DEFAULT_OUTBOUND_CAPACITY,
        DEFAULT_STATUS_ROOT,
    },
    BackoffPolicy, ConnectionSettings, QueuePolicy,
};
use serde::Deserialize;
use shared::protocol::GCODE_SCRIPT_METHOD;

pub const DEFAULT_CONFIG_FILE: &str = "touchpanel.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub daemon_url: String,
    pub command_method: String,
    pub status_root: String,
    pub subscribe_objects: Vec<String>,
    pub queue_policy: QueuePolicy,
    pub max_queued_commands: usize,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let connection = ConnectionSettings::default();
        Self {
            daemon_url: DEFAULT_DAEMON_URL.into(),
            command_method: GCODE_SCRIPT_METHOD.into(),
            status_root: DEFAULT_STATUS_ROOT.into(),
            subscribe_objects: connection.subscribe_objects,
            queue_policy: QueuePolicy::Drop,
            max_queued_commands: DEFAULT_MAX_QUEUED_COMMANDS,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.daemon_url.clone(),
            command_method: self.command_method.clone(),
            status_root: self.status_root.clone(),
            subscribe_objects: self.subscribe_objects.clone(),
            queue_policy: self.queue_policy,
            max_queued_commands: self.max_queued_commands.max(1),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.backoff_initial_ms.max(1)),
                max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms)),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    daemon_url: Option<String>,
    command_method: Option<String>,
    status_root: Option<String>,
    subscribe_objects: Option<Vec<String>>,
    queue_policy: Option<QueuePolicy>,
    max_queued_commands: Option<usize>,
    backoff_initial_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    log_filter: Option<String>,
}

/// Defaults, then the TOML file, then `APP__*` environment variables.
///
/// A missing `touchpanel.toml` is fine; a missing file passed explicitly
/// is an error.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match config_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                apply_file(&mut settings, &raw)
                    .with_context(|| format!("invalid config file '{DEFAULT_CONFIG_FILE}'"))?;
            }
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file_cfg.daemon_url {
        settings.daemon_url = v;
    }
    if let Some(v) = file_cfg.command_method {
        settings.command_method = v;
    }
    if let Some(v) = file_cfg.status_root {
        settings.status_root = v;
    }
    if let Some(v) = file_cfg.subscribe_objects {
        settings.subscribe_objects = v;
    }
    if let Some(v) = file_cfg.queue_policy {
        settings.queue_policy = v;
    }
    if let Some(v) = file_cfg.max_queued_commands {
        settings.max_queued_commands = v;
    }
    if let Some(v) = file_cfg.backoff_initial_ms {
        settings.backoff_initial_ms = v;
    }
    if let Some(v) = file_cfg.backoff_max_ms {
        settings.backoff_max_ms = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }

    Ok(())
}

/// Unparseable numeric or policy values are ignored.
pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("MOONRAKER_URL") {
        settings.daemon_url = v;
    }
    if let Some(v) = lookup("APP__DAEMON_URL") {
        settings.daemon_url = v;
    }

    if let Some(v) = lookup("APP__COMMAND_METHOD") {
        settings.command_method = v;
    }
    if let Some(v) = lookup("APP__STATUS_ROOT") {
        settings.status_root = v;
    }

    if let Some(v) = lookup("APP__SUBSCRIBE_OBJECTS") {
        settings.subscribe_objects = v
            .split(',')
            .map(str::trim)
            .filter(|object| !object.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(v) = lookup("APP__QUEUE_POLICY") {
        if let Some(parsed) = parse_queue_policy(&v) {
            settings.queue_policy = parsed;
        }
    }
    if let Some(v) = lookup("APP__MAX_QUEUED_COMMANDS") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_queued_commands = parsed;
        }
    }
    if let Some(v) = lookup("APP__BACKOFF_INITIAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff_initial_ms = parsed;
        }
    }
    if let Some(v) = lookup("APP__BACKOFF_MAX_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.backoff_max_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

pub fn parse_queue_policy(raw: &str) -> Option<QueuePolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "drop" => Some(QueuePolicy::Drop),
        "queue" | "queue_and_flush" => Some(QueuePolicy::QueueAndFlush),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
