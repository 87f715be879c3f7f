//! The `/api/job` envelope: selected file, progress and job state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full job information response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobInformation {
    /// The job the server currently has selected.
    pub job: JobSummary,

    /// Progress through the selected job.
    pub progress: JobProgress,

    /// Job state text, e.g. `Operational`, `Printing`.
    pub state: String,
}

/// The selected job's file and estimates. All fields are null when no file
/// is selected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// File backing the job.
    #[serde(default)]
    pub file: Option<FileInfo>,

    /// Estimated total print time, in seconds.
    #[serde(default)]
    pub estimated_print_time: Option<f64>,

    /// Duration of the last completed print of this file, in seconds.
    #[serde(default)]
    pub last_print_time: Option<f64>,

    /// Estimated filament use keyed by tool name.
    #[serde(default)]
    pub filament: Option<HashMap<String, FilamentUse>>,
}

/// A file reference inside a job. Every field is null when no file is
/// selected, so all are optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name, e.g. `whistle_v2.gcode`.
    #[serde(default)]
    pub name: Option<String>,

    /// Storage origin, `local` or `sdcard`.
    #[serde(default)]
    pub origin: Option<String>,

    /// File size in bytes.
    #[serde(default)]
    pub size: Option<u64>,

    /// Upload timestamp, seconds since the epoch.
    #[serde(default)]
    pub date: Option<i64>,
}

/// Estimated filament use for one tool.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilamentUse {
    /// Length in millimeters.
    #[serde(default)]
    pub length: Option<f64>,

    /// Volume in cubic centimeters.
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Progress through the selected job. Fields are null when idle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Percentage of completion, 0 to 100.
    #[serde(default)]
    pub completion: Option<f64>,

    /// Current byte position in the file.
    #[serde(default)]
    pub filepos: Option<u64>,

    /// Time already spent printing, in seconds.
    #[serde(default)]
    pub print_time: Option<f64>,

    /// Estimated time remaining, in seconds.
    #[serde(default)]
    pub print_time_left: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const JOB_BODY: &str = r#"{
        "job": {
            "file": {
                "name": "whistle_v2.gcode",
                "origin": "local",
                "size": 1468987,
                "date": 1378847754
            },
            "estimatedPrintTime": 8811,
            "filament": {"tool0": {"length": 810, "volume": 5.36}}
        },
        "progress": {
            "completion": 22.98,
            "filepos": 337942,
            "printTime": 276,
            "printTimeLeft": 912
        },
        "state": "Printing"
    }"#;

    #[test]
    fn parse_running_job() {
        let info: JobInformation = serde_json::from_str(JOB_BODY).unwrap();
        assert_eq!(info.state, "Printing");
        assert_eq!(info.job.file.unwrap().name.as_deref(), Some("whistle_v2.gcode"));
        assert_eq!(info.progress.completion, Some(22.98));
        assert_eq!(info.progress.print_time_left, Some(912.0));
    }

    #[test]
    fn parse_idle_job() {
        let info: JobInformation = serde_json::from_str(
            r#"{
                "job": {"file": {"name": null, "origin": null, "size": null, "date": null}},
                "progress": {"completion": null, "filepos": null, "printTime": null, "printTimeLeft": null},
                "state": "Operational"
            }"#,
        )
        .unwrap();
        assert_eq!(info.job.file.unwrap().name, None);
        assert_eq!(info.progress.completion, None);
    }
}
