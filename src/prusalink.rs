//! Support for single-board print controllers speaking the PrusaLink-style
//! REST dialect. Jobs are numbered and most operations address the active
//! job id, so the adapter remembers the id it saw on the last poll.

use crate::{
    connection::{
        rest::{decode, HttpAuth, RestConnection},
        ConnectionHealth,
    },
    error::MachineError,
    profile::{MachineCategory, TemperatureZone},
    state::record::{JobInfo, Position, StatusFrame, TemperatureReading},
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;
use chrono::DateTime;
use prusalink::{paths, ApiVersion, FileNode, JobDetail, Status, OVERWRITE_HEADER};
use reqwest::Method;
use std::{collections::HashMap, time::Duration};

const DEFAULT_STORAGE: &str = "usb";

/// A machine fronted by a PrusaLink-style controller.
pub struct PrusaLinkConnection {
    rest: RestConnection,
    storage: String,
    current_job: Option<u64>,
}

impl PrusaLinkConnection {
    /// A closed connection to the controller at `endpoint`.
    pub fn new(endpoint: &str, auth: HttpAuth, timeout: Duration) -> Self {
        Self {
            rest: RestConnection::new(endpoint, auth, timeout),
            storage: DEFAULT_STORAGE.to_owned(),
            current_job: None,
        }
    }

    /// The job endpoint answers 204 with an empty body when nothing runs.
    async fn job_detail(&mut self) -> Result<Option<JobDetail>, MachineError> {
        let value = self.rest.request(Method::GET, paths::JOB, None).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(decode(value)?))
    }

    async fn active_job_id(&mut self) -> Result<u64, MachineError> {
        if let Some(id) = self.current_job {
            return Ok(id);
        }
        match self.job_detail().await? {
            Some(detail) => {
                self.current_job = Some(detail.id);
                Ok(detail.id)
            }
            None => Err(MachineError::Protocol {
                status: 0,
                message: "no job is active".into(),
            }),
        }
    }
}

fn frame_from(status: &Status, job_name: Option<String>) -> StatusFrame {
    let printer = &status.printer;

    let mut temperatures = HashMap::new();
    if let Some(current) = printer.temp_nozzle {
        temperatures.insert(
            TemperatureZone::Extruder.to_string(),
            TemperatureReading {
                current,
                target: printer.target_nozzle.filter(|target| *target > 0.0),
            },
        );
    }
    if let Some(current) = printer.temp_bed {
        temperatures.insert(
            TemperatureZone::Bed.to_string(),
            TemperatureReading {
                current,
                target: printer.target_bed.filter(|target| *target > 0.0),
            },
        );
    }

    let position = (printer.axis_x.is_some() || printer.axis_y.is_some() || printer.axis_z.is_some())
        .then_some(Position {
            x: printer.axis_x,
            y: printer.axis_y,
            z: printer.axis_z,
        });

    let job = status.job.as_ref().map(|job| JobInfo {
        name: job_name,
        progress: job.progress,
        time_remaining: job.time_remaining,
        elapsed: job.time_printing,
    });

    let mut metadata = HashMap::new();
    for (key, value) in [
        ("fan_print", printer.fan_print),
        ("fan_hotend", printer.fan_hotend),
        ("print_speed", printer.speed),
        ("flow", printer.flow),
    ] {
        if let Some(value) = value {
            metadata.insert(key.to_owned(), serde_json::json!(value));
        }
    }

    StatusFrame {
        raw_status: printer.state.clone().unwrap_or_default(),
        job,
        temperatures,
        position,
        metadata,
    }
}

fn flatten_files(node: &FileNode, prefix: &str, out: &mut Vec<StoredFile>) {
    let path = format!("{prefix}/{}", node.name);
    if node.is_folder() {
        for child in &node.children {
            flatten_files(child, &path, out);
        }
    } else {
        out.push(StoredFile {
            name: node
                .display_name
                .clone()
                .unwrap_or_else(|| node.name.clone()),
            path,
            size: node.size,
            modified_at: node
                .m_timestamp
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
        });
    }
}

impl Connection for PrusaLinkConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        self.rest.open().await?;
        let version: ApiVersion =
            decode(self.rest.request(Method::GET, paths::VERSION, None).await?)?;
        if !version.is_prusalink() {
            tracing::warn!(
                endpoint = self.rest.base_url(),
                server = %version.text,
                "endpoint did not identify as PrusaLink, proceeding anyway"
            );
        }
        tracing::info!(
            endpoint = self.rest.base_url(),
            hostname = version.hostname.as_deref().unwrap_or(""),
            "print controller reachable"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        self.current_job = None;
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

impl MachineControl for PrusaLinkConnection {
    type Error = MachineError;

    async fn poll_status(&mut self) -> Result<StatusFrame, MachineError> {
        let status: Status =
            decode(self.rest.request(Method::GET, paths::STATUS, None).await?)?;
        self.current_job = status.job.as_ref().map(|job| job.id);

        // The status envelope has no file name; enrich from the job
        // endpoint, best effort.
        let job_name = if status.job.is_some() {
            match self.job_detail().await {
                Ok(detail) => {
                    detail.and_then(|detail| detail.display_name().map(ToOwned::to_owned))
                }
                Err(err) => {
                    tracing::debug!(error = %err, "job detail fetch failed during poll");
                    None
                }
            }
        } else {
            None
        };

        Ok(frame_from(&status, job_name))
    }

    async fn start(&mut self, file: &str) -> Result<(), MachineError> {
        let path = paths::file(&self.storage, file);
        self.rest.request(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), MachineError> {
        let id = self.active_job_id().await?;
        self.rest
            .request(Method::PUT, &paths::job_pause(id), None)
            .await?;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), MachineError> {
        let id = self.active_job_id().await?;
        self.rest
            .request(Method::PUT, &paths::job_resume(id), None)
            .await?;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), MachineError> {
        let id = self.active_job_id().await?;
        self.rest
            .request(Method::DELETE, &paths::job_stop(id), None)
            .await?;
        self.current_job = None;
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), MachineError> {
        // The dialect has no kill switch; stopping the job is as hard a
        // stop as the controller offers.
        match self.active_job_id().await {
            Ok(id) => {
                self.rest
                    .request(Method::DELETE, &paths::job_stop(id), None)
                    .await?;
                self.current_job = None;
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }
}

impl MotionControl for PrusaLinkConnection {
    type Error = MachineError;

    async fn home(&mut self, _axes: &[Axis]) -> Result<(), MachineError> {
        Err(MachineError::Unsupported {
            op: "home",
            category: MachineCategory::FdmPrinter,
        })
    }

    async fn jog(
        &mut self,
        _axis: Axis,
        _distance_mm: f64,
        _feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        Err(MachineError::Unsupported {
            op: "jog",
            category: MachineCategory::FdmPrinter,
        })
    }
}

impl HeaterControl for PrusaLinkConnection {
    type Error = MachineError;

    async fn set_temperature(
        &mut self,
        _zone: TemperatureZone,
        _celsius: f64,
    ) -> Result<(), MachineError> {
        Err(MachineError::Unsupported {
            op: "temperature control",
            category: MachineCategory::FdmPrinter,
        })
    }
}

impl FileStore for PrusaLinkConnection {
    type Error = MachineError;

    async fn upload_file(&mut self, path: &str, content: Bytes) -> Result<(), MachineError> {
        let target = paths::file(&self.storage, path);
        self.rest
            .put_bytes(&target, content, &[(OVERWRITE_HEADER, "?1".to_owned())])
            .await?;
        Ok(())
    }

    async fn list_files(&mut self, path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        let target = paths::file(&self.storage, path.unwrap_or(""));
        let root: FileNode =
            decode(self.rest.request(Method::GET, &target, None).await?)?;
        let mut files = Vec::new();
        if root.is_folder() {
            for child in &root.children {
                flatten_files(child, "", &mut files);
            }
        } else {
            flatten_files(&root, "", &mut files);
        }
        Ok(files)
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), MachineError> {
        let target = paths::file(&self.storage, path);
        self.rest.request(Method::DELETE, &target, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn printing_status() -> Status {
        serde_json::from_value(serde_json::json!({
            "job": {
                "id": 129,
                "progress": 50.0,
                "time_remaining": 520,
                "time_printing": 526
            },
            "printer": {
                "state": "PRINTING",
                "temp_nozzle": 214.8,
                "target_nozzle": 215.0,
                "temp_bed": 60.1,
                "target_bed": 60.0,
                "axis_z": 1.8,
                "fan_print": 4221.0,
                "flow": 100.0
            }
        }))
        .unwrap()
    }

    #[test]
    fn frames_carry_job_and_temperatures() -> TestResult {
        let status = printing_status();
        let frame = frame_from(&status, Some("mm3dpodstavec.bgcode".to_owned()));
        assert_eq!(frame.raw_status, "PRINTING");
        assert_eq!(frame.temperatures["extruder"].target, Some(215.0));
        assert_eq!(frame.temperatures["bed"].current, 60.1);
        assert_eq!(frame.position.ok_or("expected a position")?.z, Some(1.8));
        let job = frame.job.ok_or("expected a job")?;
        assert_eq!(job.name.as_deref(), Some("mm3dpodstavec.bgcode"));
        assert_eq!(job.progress, Some(50.0));
        assert_eq!(frame.metadata["fan_print"], serde_json::json!(4221.0));
        Ok(())
    }

    #[test]
    fn an_idle_controller_reports_no_job() {
        let status: Status = serde_json::from_value(serde_json::json!({
            "printer": {"state": "IDLE", "temp_nozzle": 24.1, "target_nozzle": 0.0}
        }))
        .unwrap();
        let frame = frame_from(&status, None);
        assert_eq!(frame.raw_status, "IDLE");
        assert_eq!(frame.job, None);
        assert_eq!(frame.temperatures["extruder"].target, None);
    }

    #[test]
    fn storage_trees_flatten_to_files() {
        let root: FileNode = serde_json::from_value(serde_json::json!({
            "name": "usb",
            "type": "FOLDER",
            "ro": false,
            "children": [
                {"name": "part~1.gco", "display_name": "part one.gcode", "size": 1024,
                 "m_timestamp": 1689253891},
                {"name": "cases", "type": "FOLDER", "children": [
                    {"name": "lid.gco", "size": 2048}
                ]}
            ]
        }))
        .unwrap();
        let mut files = Vec::new();
        for child in &root.children {
            flatten_files(child, "", &mut files);
        }
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "part one.gcode");
        assert_eq!(files[0].path, "/part~1.gco");
        assert_eq!(files[1].path, "/cases/lid.gco");
    }
}
