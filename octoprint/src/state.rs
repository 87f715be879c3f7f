//! The `/api/printer` envelope: live temperatures, SD readiness and the
//! server's view of the printer state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full printer state response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Temperature readings keyed by heater name (`tool0`, `bed`, `chamber`).
    #[serde(default)]
    pub temperature: HashMap<String, TemperatureData>,

    /// SD card subsystem state.
    #[serde(default)]
    pub sd: Option<SdState>,

    /// Textual state and its boolean breakdown.
    pub state: StateBlock,
}

/// One heater's readings, in degrees Celsius.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureData {
    /// Current measured temperature.
    pub actual: f64,

    /// Target temperature; absent or null when the heater is off.
    #[serde(default)]
    pub target: Option<f64>,

    /// Configured temperature offset.
    #[serde(default)]
    pub offset: Option<f64>,
}

/// SD card readiness.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdState {
    /// Whether the SD card is initialized and ready.
    pub ready: bool,
}

/// The server's state text plus the flag set it derives it from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateBlock {
    /// Display text, e.g. `Operational`, `Printing`, `Paused`.
    pub text: String,

    /// Boolean state breakdown.
    pub flags: StateFlags,
}

/// Boolean state flags. Servers of different vintages report different
/// subsets, so every flag defaults to false when absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFlags {
    /// Connected to the printer and not erroring.
    #[serde(default)]
    pub operational: bool,

    /// A job is paused.
    #[serde(default)]
    pub paused: bool,

    /// A job is printing.
    #[serde(default)]
    pub printing: bool,

    /// A cancel was requested and is being processed.
    #[serde(default)]
    pub cancelling: bool,

    /// A pause was requested and is being processed.
    #[serde(default)]
    pub pausing: bool,

    /// A resume was requested and is being processed.
    #[serde(default)]
    pub resuming: bool,

    /// A finishing job is flushing its final moves.
    #[serde(default)]
    pub finishing: bool,

    /// SD card is ready.
    #[serde(default)]
    pub sd_ready: bool,

    /// The printer reported an error.
    #[serde(default)]
    pub error: bool,

    /// Ready to accept a new job.
    #[serde(default)]
    pub ready: bool,

    /// Serial link closed or in an error state.
    #[serde(default)]
    pub closed_or_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PRINTER_BODY: &str = r#"{
        "temperature": {
            "tool0": {"actual": 214.87, "target": 220.0, "offset": 0},
            "bed": {"actual": 50.22, "target": 70.0, "offset": 5}
        },
        "sd": {"ready": true},
        "state": {
            "text": "Printing",
            "flags": {
                "operational": true,
                "paused": false,
                "printing": true,
                "cancelling": false,
                "pausing": false,
                "sdReady": true,
                "error": false,
                "ready": false,
                "closedOrError": false
            }
        }
    }"#;

    #[test]
    fn parse_printer_state() {
        let state: CurrentState = serde_json::from_str(PRINTER_BODY).unwrap();
        assert_eq!(state.state.text, "Printing");
        assert!(state.state.flags.printing);
        assert!(!state.state.flags.resuming);
        assert_eq!(state.temperature["tool0"].actual, 214.87);
        assert_eq!(state.temperature["bed"].target, Some(70.0));
        assert!(state.sd.unwrap().ready);
    }

    #[test]
    fn heater_off_has_no_target() {
        let data: TemperatureData =
            serde_json::from_str(r#"{"actual": 23.1, "target": null}"#).unwrap();
        assert_eq!(data.target, None);
    }
}
