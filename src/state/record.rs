//! Per-machine state snapshots and the telemetry frames that feed them.

use crate::{profile::MachineCategory, state::MachineState};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One temperature zone's readings, degrees Celsius.
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Measured temperature.
    pub current: f64,

    /// Target temperature; absent while the heater is off.
    #[serde(default)]
    pub target: Option<f64>,
}

/// Head or spindle position, millimeters in machine coordinates. Axes the
/// device does not report stay absent.
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X axis.
    #[serde(default)]
    pub x: Option<f64>,

    /// Y axis.
    #[serde(default)]
    pub y: Option<f64>,

    /// Z axis.
    #[serde(default)]
    pub z: Option<f64>,
}

/// What is known about the job a machine is working on.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job or file name, when the transport exposes one.
    #[serde(default)]
    pub name: Option<String>,

    /// Percentage of completion, 0 to 100.
    #[serde(default)]
    pub progress: Option<f64>,

    /// Estimated seconds remaining.
    #[serde(default)]
    pub time_remaining: Option<f64>,

    /// Seconds spent on the job so far.
    #[serde(default)]
    pub elapsed: Option<f64>,
}

/// One poll's worth of telemetry from a connection. `raw_status` is the
/// vendor's own state word; everything else is optional, and an absent
/// field means "not reported this cycle", never "gone".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusFrame {
    /// The vendor's state word, exactly as the device said it.
    pub raw_status: String,

    /// Job information, when the transport reports one.
    pub job: Option<JobInfo>,

    /// Temperature readings keyed by zone name.
    pub temperatures: HashMap<String, TemperatureReading>,

    /// Position report.
    pub position: Option<Position>,

    /// Vendor extras worth keeping around, keyed by name.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StatusFrame {
    /// A frame carrying only a raw state word.
    pub fn status_only(raw_status: impl Into<String>) -> Self {
        Self {
            raw_status: raw_status.into(),
            ..Self::default()
        }
    }
}

/// The live, normalized view of one machine. Created when the machine is
/// registered, merged on every poll, destroyed when it is unregistered.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Category the machine was registered under.
    pub category: MachineCategory,

    /// Current normalized state.
    pub state: MachineState,

    /// The state before the most recent change.
    pub previous_state: MachineState,

    /// The vendor status word behind the current state.
    #[serde(default)]
    pub raw_status: Option<String>,

    /// When this record last changed.
    pub updated_at: DateTime<Utc>,

    /// Live job, if any.
    #[serde(default)]
    pub job: Option<JobInfo>,

    /// Last known temperature per zone.
    #[serde(default)]
    pub temperatures: HashMap<String, TemperatureReading>,

    /// Last known position.
    #[serde(default)]
    pub position: Option<Position>,

    /// Vendor extras accumulated across polls.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StateRecord {
    /// A fresh record for a machine that has never been connected.
    pub fn new(category: MachineCategory) -> Self {
        Self {
            category,
            state: MachineState::Disconnected,
            previous_state: MachineState::Disconnected,
            raw_status: None,
            updated_at: Utc::now(),
            job: None,
            temperatures: HashMap::new(),
            position: None,
            metadata: HashMap::new(),
        }
    }

    /// Fold one telemetry frame into this record. Fields the frame does not
    /// carry keep their previous values; the job is dropped once the state
    /// goes terminal so stale progress never outlives its job.
    pub(crate) fn merge_frame(&mut self, frame: &StatusFrame) {
        self.raw_status = Some(frame.raw_status.clone());
        if let Some(job) = &frame.job {
            self.job = Some(job.clone());
        }
        for (zone, reading) in &frame.temperatures {
            self.temperatures.insert(zone.clone(), *reading);
        }
        if let Some(position) = frame.position {
            self.position = Some(position);
        }
        for (key, value) in &frame.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        if self.state.is_terminal() {
            self.job = None;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn printing_frame() -> StatusFrame {
        StatusFrame {
            raw_status: "printing".into(),
            job: Some(JobInfo {
                name: Some("bracket.gcode".into()),
                progress: Some(42.0),
                time_remaining: Some(900.0),
                elapsed: Some(600.0),
            }),
            temperatures: HashMap::from([(
                "extruder".to_string(),
                TemperatureReading {
                    current: 210.0,
                    target: Some(210.0),
                },
            )]),
            position: Some(Position {
                x: Some(10.0),
                y: Some(20.0),
                z: Some(0.3),
            }),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn merge_retains_missing_fields() {
        let mut record = StateRecord::new(MachineCategory::FdmPrinter);
        record.state = MachineState::Running;
        record.merge_frame(&printing_frame());

        // A later sparse frame must not erase what we already know.
        record.merge_frame(&StatusFrame::status_only("printing"));
        assert_eq!(record.job.as_ref().unwrap().progress, Some(42.0));
        assert_eq!(record.temperatures["extruder"].current, 210.0);
        assert_eq!(record.position.unwrap().z, Some(0.3));
    }

    #[test]
    fn terminal_state_clears_job() {
        let mut record = StateRecord::new(MachineCategory::FdmPrinter);
        record.state = MachineState::Running;
        record.merge_frame(&printing_frame());
        assert!(record.job.is_some());

        record.state = MachineState::Complete;
        record.merge_frame(&StatusFrame::status_only("finished"));
        assert_eq!(record.job, None);
    }
}
