//! The `/api/v1/status` envelope, the dialect's single polling endpoint.

use serde::{Deserialize, Serialize};

/// Combined printer, job and storage status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Running job summary; absent when idle.
    #[serde(default)]
    pub job: Option<StatusJob>,

    /// Printer state and telemetry.
    pub printer: StatusPrinter,

    /// Active storage summary.
    #[serde(default)]
    pub storage: Option<StatusStorage>,
}

/// Job slice of the status envelope.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusJob {
    /// Job id, used to address job control endpoints.
    pub id: u64,

    /// Percentage of completion, 0 to 100.
    #[serde(default)]
    pub progress: Option<f64>,

    /// Estimated seconds remaining.
    #[serde(default)]
    pub time_remaining: Option<f64>,

    /// Seconds spent printing so far.
    #[serde(default)]
    pub time_printing: Option<f64>,
}

/// Printer slice of the status envelope. Telemetry fields the controller
/// does not report simply stay absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPrinter {
    /// State word, e.g. `IDLE`, `PRINTING`, `PAUSED`, `ATTENTION`.
    #[serde(default)]
    pub state: Option<String>,

    /// Nozzle temperature, degrees Celsius.
    #[serde(default)]
    pub temp_nozzle: Option<f64>,

    /// Nozzle target, degrees Celsius.
    #[serde(default)]
    pub target_nozzle: Option<f64>,

    /// Bed temperature, degrees Celsius.
    #[serde(default)]
    pub temp_bed: Option<f64>,

    /// Bed target, degrees Celsius.
    #[serde(default)]
    pub target_bed: Option<f64>,

    /// X axis position, millimeters.
    #[serde(default)]
    pub axis_x: Option<f64>,

    /// Y axis position, millimeters.
    #[serde(default)]
    pub axis_y: Option<f64>,

    /// Z axis position, millimeters.
    #[serde(default)]
    pub axis_z: Option<f64>,

    /// Print fan speed, RPM.
    #[serde(default)]
    pub fan_print: Option<f64>,

    /// Hotend fan speed, RPM.
    #[serde(default)]
    pub fan_hotend: Option<f64>,

    /// Speed multiplier, percent.
    #[serde(default)]
    pub speed: Option<f64>,

    /// Flow multiplier, percent.
    #[serde(default)]
    pub flow: Option<f64>,
}

/// Storage slice of the status envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusStorage {
    /// Storage mount path, e.g. `/usb/`.
    #[serde(default)]
    pub path: Option<String>,

    /// Storage display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the storage is read-only.
    #[serde(default)]
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATUS_BODY: &str = r#"{
        "job": {"id": 129, "progress": 50.0, "time_remaining": 520, "time_printing": 526},
        "storage": {"path": "/usb/", "name": "usb", "read_only": false},
        "printer": {
            "state": "PRINTING",
            "temp_bed": 60.0, "target_bed": 60.0,
            "temp_nozzle": 209.8, "target_nozzle": 210.0,
            "axis_z": 1.8, "axis_x": 213.9, "axis_y": 170.0,
            "flow": 100, "speed": 100, "fan_hotend": 7350, "fan_print": 6900
        }
    }"#;

    #[test]
    fn parse_printing_status() {
        let status: Status = serde_json::from_str(STATUS_BODY).unwrap();
        assert_eq!(status.printer.state.as_deref(), Some("PRINTING"));
        assert_eq!(status.printer.temp_nozzle, Some(209.8));
        assert_eq!(status.job.unwrap().id, 129);
        assert_eq!(status.printer.axis_z, Some(1.8));
    }

    #[test]
    fn parse_idle_status() {
        let status: Status =
            serde_json::from_str(r#"{"printer": {"state": "IDLE", "temp_nozzle": 24.1}}"#).unwrap();
        assert!(status.job.is_none());
        assert_eq!(status.printer.target_nozzle, None);
    }
}
