//! Support for print servers speaking the OctoPrint-style REST dialect.
//! All typed shapes live in the `octoprint` crate; this module binds them
//! to the generic REST transport and maps replies into telemetry frames.

use crate::{
    connection::{
        rest::{decode, encode, HttpAuth, RestConnection},
        ConnectionHealth,
    },
    error::MachineError,
    profile::TemperatureZone,
    state::record::{JobInfo, StatusFrame, TemperatureReading},
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;
use chrono::DateTime;
use octoprint::{
    paths, ApiVersion, BedCommand, CurrentState, FileList, GcodeCommand, JobCommand,
    JobInformation, PauseAction, PrintHeadCommand, ToolCommand,
};
use reqwest::Method;
use std::{collections::HashMap, time::Duration};

/// A machine fronted by an OctoPrint-style server.
pub struct OctoPrintConnection {
    rest: RestConnection,
}

impl OctoPrintConnection {
    /// A closed connection to the server at `endpoint`, authenticating
    /// with the given application key.
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            rest: RestConnection::new(endpoint, HttpAuth::ApiKey(api_key.to_owned()), timeout),
        }
    }

    async fn post(&mut self, path: &str, body: impl serde::Serialize) -> Result<(), MachineError> {
        let body = encode(&body)?;
        self.rest.request(Method::POST, path, Some(&body)).await?;
        Ok(())
    }
}

/// The status word for a frame: the server's own text, sharpened by the
/// transition flags when the text lags behind them.
fn status_word(state: &octoprint::StateBlock) -> String {
    let flags = &state.flags;
    if flags.cancelling {
        "cancelling".to_owned()
    } else if flags.pausing {
        "pausing".to_owned()
    } else if flags.resuming {
        "resuming".to_owned()
    } else if flags.finishing {
        "finishing".to_owned()
    } else {
        state.text.clone()
    }
}

fn zone_name(vendor: &str) -> String {
    match vendor {
        "tool0" => TemperatureZone::Extruder.to_string(),
        "bed" => TemperatureZone::Bed.to_string(),
        "chamber" => TemperatureZone::Chamber.to_string(),
        other => other.to_owned(),
    }
}

fn frame_from(printer: &CurrentState, job: &JobInformation) -> StatusFrame {
    let mut temperatures = HashMap::new();
    for (vendor, data) in &printer.temperature {
        temperatures.insert(
            zone_name(vendor),
            TemperatureReading {
                current: data.actual,
                target: data.target.filter(|target| *target > 0.0),
            },
        );
    }

    let name = job.job.file.as_ref().and_then(|file| file.name.clone());
    let progress = job.progress.completion;
    let job_info = (name.is_some() || progress.is_some()).then(|| JobInfo {
        name,
        progress,
        time_remaining: job.progress.print_time_left,
        elapsed: job.progress.print_time,
    });

    StatusFrame {
        raw_status: status_word(&printer.state),
        job: job_info,
        temperatures,
        position: None,
        metadata: HashMap::new(),
    }
}

impl Connection for OctoPrintConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        self.rest.open().await?;
        let version: ApiVersion =
            decode(self.rest.request(Method::GET, paths::VERSION, None).await?)?;
        if !version.is_octoprint() {
            tracing::warn!(
                endpoint = self.rest.base_url(),
                server = %version.text,
                "endpoint did not identify as OctoPrint, proceeding anyway"
            );
        }
        tracing::info!(
            endpoint = self.rest.base_url(),
            server = %version.server,
            "print server reachable"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        self.rest.close().await
    }

    fn healthy(&self) -> bool {
        self.rest.healthy()
    }

    fn health(&self) -> ConnectionHealth {
        self.rest.health()
    }

    async fn send(
        &mut self,
        command: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, MachineError> {
        self.rest.send(command, params).await
    }
}

impl MachineControl for OctoPrintConnection {
    type Error = MachineError;

    async fn poll_status(&mut self) -> Result<StatusFrame, MachineError> {
        let printer: CurrentState =
            decode(self.rest.request(Method::GET, paths::PRINTER, None).await?)?;
        let job: JobInformation =
            decode(self.rest.request(Method::GET, paths::JOB, None).await?)?;
        Ok(frame_from(&printer, &job))
    }

    async fn start(&mut self, file: &str) -> Result<(), MachineError> {
        // Selecting with print=true starts the job in one request.
        let path = format!("{}/{}", paths::FILES_LOCAL, file.trim_start_matches('/'));
        let body = serde_json::json!({"command": "select", "print": true});
        self.rest.request(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), MachineError> {
        self.post(
            paths::JOB,
            JobCommand::Pause {
                action: PauseAction::Pause,
            },
        )
        .await
    }

    async fn resume(&mut self) -> Result<(), MachineError> {
        self.post(
            paths::JOB,
            JobCommand::Pause {
                action: PauseAction::Resume,
            },
        )
        .await
    }

    async fn cancel(&mut self) -> Result<(), MachineError> {
        self.post(paths::JOB, JobCommand::Cancel).await
    }

    async fn emergency_stop(&mut self) -> Result<(), MachineError> {
        self.post(paths::COMMAND, GcodeCommand::line("M112")).await
    }
}

impl MotionControl for OctoPrintConnection {
    type Error = MachineError;

    async fn home(&mut self, axes: &[Axis]) -> Result<(), MachineError> {
        let axes = if axes.is_empty() {
            vec!["x".to_owned(), "y".to_owned(), "z".to_owned()]
        } else {
            axes.iter()
                .map(|axis| axis.to_string().to_lowercase())
                .collect()
        };
        self.post(paths::PRINTHEAD, PrintHeadCommand::home(axes)).await
    }

    async fn jog(
        &mut self,
        axis: Axis,
        distance_mm: f64,
        feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        let axis = axis.to_string().to_lowercase();
        self.post(
            paths::PRINTHEAD,
            PrintHeadCommand::jog(&axis, distance_mm, feedrate_mm_min),
        )
        .await
    }
}

impl HeaterControl for OctoPrintConnection {
    type Error = MachineError;

    async fn set_temperature(
        &mut self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> Result<(), MachineError> {
        match zone {
            TemperatureZone::Extruder => {
                self.post(paths::TOOL, ToolCommand::target("tool0", celsius))
                    .await
            }
            TemperatureZone::Bed => {
                self.post(paths::BED, BedCommand::Target { target: celsius })
                    .await
            }
            TemperatureZone::Chamber => Err(MachineError::Unsupported {
                op: "chamber temperature control",
                category: crate::profile::MachineCategory::FdmPrinter,
            }),
        }
    }
}

impl FileStore for OctoPrintConnection {
    type Error = MachineError;

    async fn upload_file(&mut self, path: &str, content: Bytes) -> Result<(), MachineError> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let reply = self
            .rest
            .upload_multipart(paths::FILES_LOCAL, file_name, content)
            .await?;
        let reply: octoprint::UploadResponse = decode(reply)?;
        tracing::debug!(file = file_name, done = reply.done, "upload accepted");
        Ok(())
    }

    async fn list_files(&mut self, _path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        let list: FileList =
            decode(self.rest.request(Method::GET, paths::FILES_LOCAL, None).await?)?;
        Ok(list
            .files
            .into_iter()
            .map(|entry| StoredFile {
                path: entry.path.unwrap_or_else(|| entry.name.clone()),
                name: entry.name,
                size: entry.size,
                modified_at: entry
                    .date
                    .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            })
            .collect())
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), MachineError> {
        let path = format!("{}/{}", paths::FILES_LOCAL, path.trim_start_matches('/'));
        self.rest.request(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn printing_fixture() -> (CurrentState, JobInformation) {
        let printer = serde_json::from_value(serde_json::json!({
            "temperature": {
                "tool0": {"actual": 214.81, "target": 215.0, "offset": 0},
                "bed": {"actual": 59.92, "target": 60.0}
            },
            "sd": {"ready": true},
            "state": {
                "text": "Printing",
                "flags": {"operational": true, "printing": true}
            }
        }))
        .unwrap();
        let job = serde_json::from_value(serde_json::json!({
            "job": {
                "file": {"name": "bracket.gcode", "origin": "local", "size": 1468987},
                "estimatedPrintTime": 8811.0
            },
            "progress": {
                "completion": 42.0,
                "filepos": 337942,
                "printTime": 3600.0,
                "printTimeLeft": 5211.0
            },
            "state": "Printing"
        }))
        .unwrap();
        (printer, job)
    }

    #[test]
    fn frames_carry_job_and_temperatures() -> TestResult {
        let (printer, job) = printing_fixture();
        let frame = frame_from(&printer, &job);
        assert_eq!(frame.raw_status, "Printing");
        assert_eq!(frame.temperatures["extruder"].current, 214.81);
        assert_eq!(frame.temperatures["extruder"].target, Some(215.0));
        assert_eq!(frame.temperatures["bed"].current, 59.92);
        let job = frame.job.ok_or("expected a job")?;
        assert_eq!(job.name.as_deref(), Some("bracket.gcode"));
        assert_eq!(job.progress, Some(42.0));
        assert_eq!(job.time_remaining, Some(5211.0));
        Ok(())
    }

    #[test]
    fn flags_sharpen_a_stale_status_word() {
        let (mut printer, job) = printing_fixture();
        printer.state.flags.pausing = true;
        let frame = frame_from(&printer, &job);
        assert_eq!(frame.raw_status, "pausing");
    }

    #[test]
    fn an_idle_server_reports_no_job() {
        let printer: CurrentState = serde_json::from_value(serde_json::json!({
            "temperature": {"tool0": {"actual": 22.9, "target": 0.0}},
            "state": {"text": "Operational", "flags": {"operational": true, "ready": true}}
        }))
        .unwrap();
        let job: JobInformation = serde_json::from_value(serde_json::json!({
            "job": {"file": {"name": null}},
            "progress": {"completion": null},
            "state": "Operational"
        }))
        .unwrap();
        let frame = frame_from(&printer, &job);
        assert_eq!(frame.raw_status, "Operational");
        assert_eq!(frame.job, None);
        // A zero target means the hotend is off, not aiming for zero.
        assert_eq!(frame.temperatures["extruder"].target, None);
    }
}
