//! Request bodies for the dialect's command endpoints. Each endpoint takes a
//! `{"command": ...}` object; the enums here serialize straight into those.

use serde::Serialize;
use std::collections::HashMap;

/// Body for `POST /api/job`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum JobCommand {
    /// Start printing the currently selected file.
    Start,

    /// Cancel the running or paused job.
    Cancel,

    /// Pause, resume or toggle the running job.
    Pause {
        /// The refinement of the pause command.
        action: PauseAction,
    },
}

/// Refinement for [JobCommand::Pause].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseAction {
    /// Pause the running job.
    Pause,

    /// Resume the paused job.
    Resume,

    /// Toggle between paused and running.
    Toggle,
}

/// Body for `POST /api/printer/printhead`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum PrintHeadCommand {
    /// Relative move of one or more axes.
    Jog {
        /// X distance in millimeters.
        #[serde(skip_serializing_if = "Option::is_none")]
        x: Option<f64>,

        /// Y distance in millimeters.
        #[serde(skip_serializing_if = "Option::is_none")]
        y: Option<f64>,

        /// Z distance in millimeters.
        #[serde(skip_serializing_if = "Option::is_none")]
        z: Option<f64>,

        /// Feedrate in millimeters per minute.
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,

        /// False for a relative move.
        absolute: bool,
    },

    /// Home the named axes.
    Home {
        /// Lowercase axis names, e.g. `["x", "y"]`.
        axes: Vec<String>,
    },
}

impl PrintHeadCommand {
    /// A relative jog along the named lowercase axis.
    pub fn jog(axis: &str, distance: f64, speed: Option<f64>) -> Self {
        let (mut x, mut y, mut z) = (None, None, None);
        match axis {
            "y" => y = Some(distance),
            "z" => z = Some(distance),
            _ => x = Some(distance),
        }
        Self::Jog {
            x,
            y,
            z,
            speed,
            absolute: false,
        }
    }

    /// Home the named lowercase axes.
    pub fn home(axes: Vec<String>) -> Self {
        Self::Home { axes }
    }
}

/// Body for `POST /api/printer/tool`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ToolCommand {
    /// Set target temperatures keyed by tool name.
    Target {
        /// Targets in degrees Celsius, e.g. `{"tool0": 220.0}`.
        targets: HashMap<String, f64>,
    },
}

impl ToolCommand {
    /// Set one tool's target temperature.
    pub fn target(tool: &str, celsius: f64) -> Self {
        Self::Target {
            targets: HashMap::from([(tool.to_owned(), celsius)]),
        }
    }
}

/// Body for `POST /api/printer/bed`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum BedCommand {
    /// Set the bed target temperature.
    Target {
        /// Target in degrees Celsius.
        target: f64,
    },
}

/// Body for `POST /api/printer/command`: one raw G-code line handed
/// straight to the firmware.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GcodeCommand {
    /// The G-code line to send.
    pub command: String,
}

impl GcodeCommand {
    /// Wrap one G-code line.
    pub fn line(command: &str) -> Self {
        Self {
            command: command.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn job_commands_serialize() {
        assert_eq!(
            serde_json::to_value(JobCommand::Start).unwrap(),
            serde_json::json!({"command": "start"})
        );
        assert_eq!(
            serde_json::to_value(JobCommand::Pause {
                action: PauseAction::Resume
            })
            .unwrap(),
            serde_json::json!({"command": "pause", "action": "resume"})
        );
    }

    #[test]
    fn jog_skips_untouched_axes() {
        assert_eq!(
            serde_json::to_value(PrintHeadCommand::jog("z", -0.5, Some(300.0))).unwrap(),
            serde_json::json!({"command": "jog", "z": -0.5, "speed": 300.0, "absolute": false})
        );
    }

    #[test]
    fn temperature_targets_serialize() {
        assert_eq!(
            serde_json::to_value(ToolCommand::target("tool0", 215.0)).unwrap(),
            serde_json::json!({"command": "target", "targets": {"tool0": 215.0}})
        );
        assert_eq!(
            serde_json::to_value(BedCommand::Target { target: 60.0 }).unwrap(),
            serde_json::json!({"command": "target", "target": 60.0})
        );
    }
}
