use std::{collections::BTreeMap, sync::Arc};

use client_core::{CommandSink, ConnectionError};
use parking_lot::Mutex;
use shared::{ProtocolError, StatePath};
use state_sync::{Consumer, Delta, Dispatcher, RegistrationToken, StateStore};
use thiserror::Error;
use tracing::debug;

pub const MIN_EXTRUDE_TEMP: f64 = 170.0;
pub const TEMPERATURE_PRESETS: [u32; 7] = [180, 190, 200, 210, 220, 230, 240];
pub const LENGTH_PRESETS: [u32; 7] = [5, 10, 15, 20, 25, 30, 35];
pub const SPEED_PRESETS: [u32; 7] = [1, 2, 5, 10, 25, 35, 50];

const DEFAULT_LENGTH_IDX: usize = 1;
const DEFAULT_SPEED_IDX: usize = 2;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("extruder is too cold to move filament ({temperature:?} C)")]
    TooCold { temperature: Option<f64> },
    #[error("no {selector} preset at index {idx}")]
    InvalidSelection { selector: &'static str, idx: usize },
    #[error(transparent)]
    Command(#[from] ConnectionError),
}

/// What the extruder screen currently shows.
///
/// Preset indices are only set through the panel's selectors, which check
/// them against the preset tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtruderView {
    pub temperature: Option<f64>,
    pub target: Option<f64>,
    pub motion_enabled: bool,
    pub foreground: bool,
    pub temperature_idx: Option<usize>,
    length_idx: usize,
    speed_idx: usize,
}

impl Default for ExtruderView {
    fn default() -> Self {
        Self {
            temperature: None,
            target: None,
            motion_enabled: false,
            foreground: false,
            temperature_idx: None,
            length_idx: DEFAULT_LENGTH_IDX,
            speed_idx: DEFAULT_SPEED_IDX,
        }
    }
}

impl ExtruderView {
    pub fn length_mm(&self) -> u32 {
        LENGTH_PRESETS[self.length_idx]
    }

    pub fn speed_mm_s(&self) -> u32 {
        SPEED_PRESETS[self.speed_idx]
    }

    fn observe_temperature(&mut self, temperature: f64) {
        self.temperature = Some(temperature);
        self.motion_enabled = temperature >= MIN_EXTRUDE_TEMP;
    }
}

/// Extruder controls: live temperature, heater presets, extrude and retract.
pub struct ExtruderPanel {
    dispatcher: Arc<Dispatcher>,
    commands: Arc<dyn CommandSink>,
    temperature_path: StatePath,
    target_path: StatePath,
    view: Mutex<ExtruderView>,
    registration: Mutex<Option<RegistrationToken>>,
}

impl ExtruderPanel {
    /// Builds the panel and registers it with `dispatcher`.
    pub fn attach(
        dispatcher: Arc<Dispatcher>,
        commands: Arc<dyn CommandSink>,
        status_root: &str,
    ) -> Result<Arc<Self>, ProtocolError> {
        let extruder = StatePath::parse(status_root)?.join("extruder");
        let panel = Arc::new(Self {
            temperature_path: extruder.join("temperature"),
            target_path: extruder.join("target"),
            dispatcher: Arc::clone(&dispatcher),
            commands,
            view: Mutex::new(ExtruderView::default()),
            registration: Mutex::new(None),
        });
        let token = dispatcher.register(&panel);
        *panel.registration.lock() = Some(token);
        Ok(panel)
    }

    pub fn detach(&self) {
        if let Some(token) = self.registration.lock().take() {
            self.dispatcher.unregister(token);
        }
    }

    pub fn view(&self) -> ExtruderView {
        self.view.lock().clone()
    }

    /// Brings the panel up, catching up on whatever changed while hidden.
    pub fn foreground(&self) {
        let store = self.dispatcher.store();
        let temperature = store.get_path(&self.temperature_path).as_f64();
        let target = store.get_path(&self.target_path).as_f64();

        let mut view = self.view.lock();
        if let Some(temperature) = temperature {
            view.observe_temperature(temperature);
        }
        if target.is_some() {
            view.target = target;
        }
        view.foreground = true;
    }

    pub fn background(&self) {
        self.view.lock().foreground = false;
    }

    pub fn select_temperature(&self, idx: usize) -> Result<(), PanelError> {
        let target = *TEMPERATURE_PRESETS
            .get(idx)
            .ok_or(PanelError::InvalidSelection {
                selector: "temperature",
                idx,
            })?;
        self.set_target_temperature(target)?;
        self.view.lock().temperature_idx = Some(idx);
        Ok(())
    }

    /// Any target, not only a preset; a matching preset becomes selected.
    pub fn set_target_temperature(&self, target: u32) -> Result<(), PanelError> {
        self.commands.send_command(&format!(
            "SET_HEATER_TEMPERATURE HEATER=extruder TARGET={target}"
        ))?;
        self.view.lock().temperature_idx =
            TEMPERATURE_PRESETS.iter().position(|preset| *preset == target);
        Ok(())
    }

    pub fn select_length(&self, idx: usize) -> Result<(), PanelError> {
        if idx >= LENGTH_PRESETS.len() {
            return Err(PanelError::InvalidSelection {
                selector: "length",
                idx,
            });
        }
        self.view.lock().length_idx = idx;
        Ok(())
    }

    pub fn select_speed(&self, idx: usize) -> Result<(), PanelError> {
        if idx >= SPEED_PRESETS.len() {
            return Err(PanelError::InvalidSelection {
                selector: "speed",
                idx,
            });
        }
        self.view.lock().speed_idx = idx;
        Ok(())
    }

    pub fn extrude(&self) -> Result<(), PanelError> {
        self.move_filament("")
    }

    pub fn retract(&self) -> Result<(), PanelError> {
        self.move_filament("-")
    }

    fn move_filament(&self, sign: &str) -> Result<(), PanelError> {
        let script = {
            let view = self.view.lock();
            if !view.motion_enabled {
                return Err(PanelError::TooCold {
                    temperature: view.temperature,
                });
            }
            format!(
                "M83\nG1 E{sign}{} F{}",
                view.length_mm(),
                view.speed_mm_s() * 60
            )
        };
        self.commands.send_command(&script)?;
        Ok(())
    }
}

impl Consumer for ExtruderPanel {
    fn consume(&self, delta: &Delta, _state: &StateStore) -> anyhow::Result<()> {
        let temperature = delta.get_path(&self.temperature_path).and_then(|v| v.as_f64());
        let target = delta.get_path(&self.target_path).and_then(|v| v.as_f64());
        if temperature.is_none() && target.is_none() {
            return Ok(());
        }

        let mut view = self.view.lock();
        if let Some(temperature) = temperature {
            view.observe_temperature(temperature);
        }
        if target.is_some() {
            view.target = target;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "extruder_panel"
    }
}

impl Drop for ExtruderPanel {
    fn drop(&mut self) {
        if let Some(token) = self.registration.get_mut().take() {
            self.dispatcher.unregister(token);
        }
    }
}

/// Logs each printer object a delta touches and counts updates per object.
pub struct StatusLog {
    status_root: StatePath,
    updates: Mutex<BTreeMap<String, u64>>,
}

impl StatusLog {
    pub fn new(status_root: &str) -> Result<Self, ProtocolError> {
        Ok(Self {
            status_root: StatePath::parse(status_root)?,
            updates: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn updates(&self) -> BTreeMap<String, u64> {
        self.updates.lock().clone()
    }
}

impl Consumer for StatusLog {
    fn consume(&self, delta: &Delta, _state: &StateStore) -> anyhow::Result<()> {
        let Some(objects) = delta
            .get_path(&self.status_root)
            .and_then(|status| status.as_object())
        else {
            return Ok(());
        };

        let mut updates = self.updates.lock();
        for (object, fields) in objects {
            debug!(object = %object, fields = %fields, "printer object updated");
            *updates.entry(object.clone()).or_default() += 1;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "status_log"
    }
}

#[cfg(test)]
#[path = "tests/panels_tests.rs"]
mod tests;
