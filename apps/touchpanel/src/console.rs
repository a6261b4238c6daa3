use std::sync::Arc;

use anyhow::Context;
use client_core::ConnectionManager;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::panels::{ExtruderPanel, LENGTH_PRESETS, SPEED_PRESETS, TEMPERATURE_PRESETS};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Empty,
    Quit,
    Extrude,
    Retract,
    SetTemperature(u32),
    Length(u32),
    Speed(u32),
    Show(String),
    State,
    Foreground,
    Background,
    Gcode(String),
}

pub fn parse_line(line: &str) -> anyhow::Result<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match (word, rest) {
        ("", _) => ConsoleCommand::Empty,
        ("quit" | "exit", "") => ConsoleCommand::Quit,
        ("extrude", "") => ConsoleCommand::Extrude,
        ("retract", "") => ConsoleCommand::Retract,
        ("state", "") => ConsoleCommand::State,
        ("panel", "") => ConsoleCommand::Foreground,
        ("hide", "") => ConsoleCommand::Background,
        ("temp", value) => ConsoleCommand::SetTemperature(
            value
                .parse()
                .with_context(|| format!("invalid temperature '{value}'"))?,
        ),
        ("length", value) => ConsoleCommand::Length(
            value
                .parse()
                .with_context(|| format!("invalid length '{value}'"))?,
        ),
        ("speed", value) => ConsoleCommand::Speed(
            value
                .parse()
                .with_context(|| format!("invalid speed '{value}'"))?,
        ),
        ("show", "") => ConsoleCommand::Show("/".to_string()),
        ("show", path) => ConsoleCommand::Show(path.to_string()),
        _ => ConsoleCommand::Gcode(line.to_string()),
    };
    Ok(command)
}

#[derive(Debug)]
pub enum Flow {
    Continue(Option<String>),
    Quit,
}

pub struct Console {
    pub connection: Arc<ConnectionManager>,
    pub extruder: Arc<ExtruderPanel>,
}

impl Console {
    pub fn execute(&self, command: ConsoleCommand) -> anyhow::Result<Flow> {
        let output = match command {
            ConsoleCommand::Empty => None,
            ConsoleCommand::Quit => return Ok(Flow::Quit),
            ConsoleCommand::Extrude => {
                self.extruder.extrude()?;
                None
            }
            ConsoleCommand::Retract => {
                self.extruder.retract()?;
                None
            }
            ConsoleCommand::SetTemperature(target) => {
                match TEMPERATURE_PRESETS.iter().position(|preset| *preset == target) {
                    Some(idx) => self.extruder.select_temperature(idx)?,
                    None => self.extruder.set_target_temperature(target)?,
                }
                None
            }
            ConsoleCommand::Length(mm) => {
                let idx = preset_index(&LENGTH_PRESETS, mm, "length")?;
                self.extruder.select_length(idx)?;
                None
            }
            ConsoleCommand::Speed(mm_s) => {
                let idx = preset_index(&SPEED_PRESETS, mm_s, "speed")?;
                self.extruder.select_speed(idx)?;
                None
            }
            ConsoleCommand::Show(path) => {
                let value = self.connection.dispatcher().get(&path);
                Some(serde_json::to_string_pretty(&value)?)
            }
            ConsoleCommand::State => {
                let view = self.extruder.view();
                Some(format!(
                    "session={} panel={} extruder={:?} target={:?} preset={:?} motion={} length={}mm speed={}mm/s",
                    self.connection.state(),
                    if view.foreground { "shown" } else { "hidden" },
                    view.temperature,
                    view.target,
                    view.temperature_idx.map(|idx| TEMPERATURE_PRESETS[idx]),
                    view.motion_enabled,
                    view.length_mm(),
                    view.speed_mm_s()
                ))
            }
            ConsoleCommand::Foreground => {
                self.extruder.foreground();
                None
            }
            ConsoleCommand::Background => {
                self.extruder.background();
                None
            }
            ConsoleCommand::Gcode(script) => {
                self.connection.send_command(&script)?;
                None
            }
        };
        Ok(Flow::Continue(output))
    }
}

pub fn preset_index(presets: &[u32], value: u32, selector: &str) -> anyhow::Result<usize> {
    presets
        .iter()
        .position(|preset| *preset == value)
        .with_context(|| format!("{value} is not a {selector} preset (choose from {presets:?})"))
}

/// Reads commands until `quit`, end of input or ctrl-c.
pub async fn run<R>(input: R, console: &Console) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let result = parse_line(&line).and_then(|command| console.execute(command));
                match result {
                    Ok(Flow::Quit) => return Ok(()),
                    Ok(Flow::Continue(Some(output))) => println!("{output}"),
                    Ok(Flow::Continue(None)) => {}
                    Err(err) => warn!(error = %err, "console command failed"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
