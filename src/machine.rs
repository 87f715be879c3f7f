//! One provisioned machine: a category profile bound to a connection,
//! with every command validated against the profile and the live state
//! before anything touches the wire. The emergency stop is the one
//! deliberate exception to all of that.

use crate::{
    any::AnyConnection,
    connection::ConnectionHealth,
    error::MachineError,
    profile::{Capability, MachineCategory, MachineProfile, TemperatureZone},
    retry::{retry_transient, BackoffPolicy},
    state::{
        record::{JobInfo, StateRecord, TemperatureReading},
        tracker::StateTracker,
        MachineState,
    },
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};

/// A handle to one machine. Clones share the connection, the state record
/// and the poll task; commands from all clones serialize through the
/// connection lock.
#[derive(Clone)]
pub struct Machine {
    id: String,
    profile: &'static MachineProfile,
    connection: Arc<Mutex<AnyConnection>>,
    tracker: Arc<StateTracker>,
    backoff: BackoffPolicy,
    poll_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Machine {
    /// Bind `connection` to the profile for `category` and register the
    /// machine with the tracker. The connection starts closed; call
    /// [Machine::connect].
    pub fn new(
        id: &str,
        category: MachineCategory,
        connection: impl Into<AnyConnection>,
        tracker: Arc<StateTracker>,
    ) -> Self {
        tracker.register(id, category);
        Self {
            id: id.to_owned(),
            profile: MachineProfile::for_category(category),
            connection: Arc::new(Mutex::new(connection.into())),
            tracker,
            backoff: BackoffPolicy::default(),
            poll_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the default backoff schedule used when opening.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The machine's registry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The category profile this machine was provisioned under.
    pub fn profile(&self) -> &'static MachineProfile {
        self.profile
    }

    /// The machine's category.
    pub fn category(&self) -> MachineCategory {
        self.profile.category
    }

    /// The current normalized state.
    pub fn state(&self) -> MachineState {
        self.tracker
            .get(&self.id)
            .map(|record| record.state)
            .unwrap_or_default()
    }

    /// A snapshot of the full state record.
    pub fn record(&self) -> Option<StateRecord> {
        self.tracker.get(&self.id)
    }

    /// Last known temperature readings, keyed by zone name.
    pub fn temperatures(&self) -> HashMap<String, TemperatureReading> {
        self.record()
            .map(|record| record.temperatures)
            .unwrap_or_default()
    }

    /// The job in progress, when one is.
    pub fn current_job(&self) -> Option<JobInfo> {
        self.record().and_then(|record| record.job)
    }

    /// Percentage of completion of the current job.
    pub fn progress(&self) -> Option<f64> {
        self.current_job().and_then(|job| job.progress)
    }

    /// Estimated seconds left on the current job.
    pub fn time_remaining(&self) -> Option<f64> {
        self.current_job().and_then(|job| job.time_remaining)
    }

    /// Whether the connection is open and under the failure limit.
    pub async fn healthy(&self) -> bool {
        self.connection.lock().await.healthy()
    }

    /// Snapshot of the connection health counters.
    pub async fn health(&self) -> ConnectionHealth {
        self.connection.lock().await.health()
    }

    /// Open the connection, retrying transient failures on the backoff
    /// schedule, then prime the state record with a first poll.
    pub async fn connect(&self) -> Result<StateRecord, MachineError> {
        self.tracker
            .force_state(&self.id, MachineState::Connecting, None)?;
        let connection = self.connection.clone();
        let opened = retry_transient(&self.backoff, "open", move || {
            let connection = connection.clone();
            async move { connection.lock().await.open().await }
        })
        .await;
        if let Err(err) = opened {
            self.tracker
                .force_state(&self.id, MachineState::Disconnected, None)?;
            return Err(err);
        }
        self.poll_once().await
    }

    /// Close the connection and mark the machine disconnected.
    pub async fn disconnect(&self) -> Result<(), MachineError> {
        self.connection.lock().await.close().await?;
        self.tracker
            .force_state(&self.id, MachineState::Disconnected, None)?;
        Ok(())
    }

    /// Fetch one telemetry frame and fold it into the state record. An
    /// unhealthy connection is torn down and reopened first; a permanent
    /// poll failure moves the machine to the error state.
    pub async fn poll_once(&self) -> Result<StateRecord, MachineError> {
        let poll_result = {
            let mut connection = self.connection.lock().await;
            if !connection.healthy() {
                tracing::warn!(machine_id = %self.id, "connection unhealthy, reopening");
                let _ = connection.close().await;
                self.tracker
                    .force_state(&self.id, MachineState::Connecting, None)?;
                if let Err(err) = connection.open().await {
                    self.tracker
                        .force_state(&self.id, MachineState::Disconnected, None)?;
                    return Err(err);
                }
            }
            connection.poll_status().await
        };
        match poll_result {
            Ok(frame) => self.tracker.update(&self.id, &frame),
            Err(err) => {
                if !err.is_transient() {
                    self.tracker
                        .force_state(&self.id, MachineState::Error, None)?;
                }
                Err(err)
            }
        }
    }

    /// Poll on `interval` until [Machine::shutdown]. Starting twice is a
    /// no-op.
    pub async fn start_polling(&self, interval: Duration) {
        let mut task_slot = self.poll_task.lock().await;
        if task_slot.is_some() {
            return;
        }
        let machine = self.clone();
        *task_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = machine.poll_once().await {
                    tracing::debug!(machine_id = %machine.id, error = %err, "poll failed");
                }
            }
        }));
    }

    /// Stop polling, close the connection and mark the machine
    /// disconnected.
    pub async fn shutdown(&self) -> Result<(), MachineError> {
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        self.connection.lock().await.close().await?;
        self.tracker
            .force_state(&self.id, MachineState::Disconnected, None)?;
        Ok(())
    }

    fn require_capability(
        &self,
        capability: Capability,
        op: &'static str,
    ) -> Result<(), MachineError> {
        if self.profile.has_capability(capability) {
            Ok(())
        } else {
            Err(MachineError::Unsupported {
                op,
                category: self.profile.category,
            })
        }
    }

    fn require_state(
        &self,
        op: &'static str,
        allowed: &[MachineState],
    ) -> Result<MachineState, MachineError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(MachineError::InvalidState { op, state })
        }
    }

    /// Any state in which the machine is reachable and not faulted.
    fn require_operational(&self, op: &'static str) -> Result<MachineState, MachineError> {
        let state = self.state();
        if matches!(
            state,
            MachineState::Disconnected
                | MachineState::Connecting
                | MachineState::Error
                | MachineState::Unknown
        ) {
            Err(MachineError::InvalidState { op, state })
        } else {
            Ok(state)
        }
    }

    /// Start the stored job `file`. Requires an idle machine.
    pub async fn start(&self, file: &str) -> Result<(), MachineError> {
        self.require_capability(Capability::Start, "start")?;
        self.require_state(
            "start",
            &[
                MachineState::Idle,
                MachineState::Complete,
                MachineState::Cancelled,
            ],
        )?;
        if file.trim().is_empty() {
            return Err(MachineError::InvalidParameter(
                "file name must not be empty".into(),
            ));
        }
        self.connection.lock().await.start(file).await?;
        self.tracker
            .force_state(&self.id, MachineState::Preparing, None)?;
        Ok(())
    }

    /// Pause the running job.
    pub async fn pause(&self) -> Result<(), MachineError> {
        self.require_capability(Capability::Pause, "pause")?;
        self.require_state("pause", &[MachineState::Running])?;
        self.connection.lock().await.pause().await?;
        self.tracker
            .force_state(&self.id, MachineState::Pausing, None)?;
        Ok(())
    }

    /// Resume the paused job.
    pub async fn resume(&self) -> Result<(), MachineError> {
        self.require_capability(Capability::Resume, "resume")?;
        self.require_state("resume", &[MachineState::Paused])?;
        self.connection.lock().await.resume().await?;
        self.tracker
            .force_state(&self.id, MachineState::Resuming, None)?;
        Ok(())
    }

    /// Cancel the job in progress, whatever phase it is in.
    pub async fn cancel(&self) -> Result<(), MachineError> {
        self.require_capability(Capability::Cancel, "cancel")?;
        self.require_state(
            "cancel",
            &[
                MachineState::Running,
                MachineState::Paused,
                MachineState::Pausing,
                MachineState::Resuming,
                MachineState::Preparing,
            ],
        )?;
        self.connection.lock().await.cancel().await?;
        self.tracker
            .force_state(&self.id, MachineState::Cancelling, None)?;
        Ok(())
    }

    /// Halt the machine as hard as the transport allows and mark it
    /// errored. No capability or state check applies: this must fire from
    /// anywhere, and the record shows the error state even when the
    /// transport send fails.
    pub async fn emergency_stop(&self) -> Result<(), MachineError> {
        let sent = self.connection.lock().await.emergency_stop().await;
        if let Err(err) = &sent {
            tracing::error!(
                machine_id = %self.id,
                error = %err,
                "emergency stop did not reach the machine"
            );
        }
        self.tracker
            .force_state(&self.id, MachineState::Error, Some("emergency stop"))?;
        sent
    }

    /// Home the given axes, or all of them when none are named.
    pub async fn home(&self, axes: &[Axis]) -> Result<(), MachineError> {
        self.require_capability(Capability::Home, "home")?;
        self.require_state(
            "home",
            &[
                MachineState::Idle,
                MachineState::Complete,
                MachineState::Cancelled,
                MachineState::Maintenance,
            ],
        )?;
        self.connection.lock().await.home(axes).await
    }

    /// Relative move of one axis.
    pub async fn jog(
        &self,
        axis: Axis,
        distance_mm: f64,
        feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        self.require_capability(Capability::Jog, "jog")?;
        self.require_state(
            "jog",
            &[
                MachineState::Idle,
                MachineState::Complete,
                MachineState::Cancelled,
                MachineState::Maintenance,
            ],
        )?;
        if !distance_mm.is_finite() || distance_mm == 0.0 {
            return Err(MachineError::InvalidParameter(
                "jog distance must be finite and nonzero".into(),
            ));
        }
        if let Some(feedrate) = feedrate_mm_min {
            if !feedrate.is_finite() || feedrate <= 0.0 {
                return Err(MachineError::InvalidParameter(
                    "feedrate must be finite and positive".into(),
                ));
            }
        }
        self.connection
            .lock()
            .await
            .jog(axis, distance_mm, feedrate_mm_min)
            .await
    }

    /// Set one zone's target temperature, validated against the profile's
    /// ceiling for that zone.
    pub async fn set_temperature(
        &self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> Result<(), MachineError> {
        self.require_capability(Capability::SetTemperature, "set temperature")?;
        self.require_operational("set temperature")?;
        if !celsius.is_finite() || celsius < 0.0 {
            return Err(MachineError::InvalidParameter(
                "temperature must be finite and not below zero".into(),
            ));
        }
        let Some(ceiling) = self.profile.temperature_ceiling(zone) else {
            return Err(MachineError::InvalidParameter(format!(
                "this machine has no {zone} heater"
            )));
        };
        if celsius > ceiling {
            return Err(MachineError::InvalidParameter(format!(
                "{celsius}C exceeds the {ceiling}C limit for the {zone}"
            )));
        }
        self.connection
            .lock()
            .await
            .set_temperature(zone, celsius)
            .await
    }

    /// Store `content` under `path` on the machine.
    pub async fn upload_file(&self, path: &str, content: Bytes) -> Result<(), MachineError> {
        self.require_capability(Capability::UploadFile, "upload")?;
        self.require_operational("upload")?;
        self.connection.lock().await.upload_file(path, content).await
    }

    /// List the machine's storage.
    pub async fn list_files(&self, path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        self.require_capability(Capability::ListFiles, "list files")?;
        self.require_operational("list files")?;
        self.connection.lock().await.list_files(path).await
    }

    /// Delete the stored file at `path`.
    pub async fn delete_file(&self, path: &str) -> Result<(), MachineError> {
        self.require_capability(Capability::DeleteFile, "delete file")?;
        self.require_operational("delete file")?;
        self.connection.lock().await.delete_file(path).await
    }

    /// Transport-native escape hatch: a raw G-code line for serial
    /// machines, `"METHOD path"` plus an optional body for REST ones.
    /// Usable in the error state, where recovery commands live.
    pub async fn send_raw(
        &self,
        command: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, MachineError> {
        let state = self.state();
        if matches!(
            state,
            MachineState::Disconnected | MachineState::Connecting
        ) {
            return Err(MachineError::InvalidState { op: "send", state });
        }
        self.connection.lock().await.send(command, params).await
    }
}
