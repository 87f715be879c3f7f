//! A connection to nowhere. Accepts every command, records it, and
//! reports whatever status it was last told. Handy for dry runs, and the
//! workhorse behind most of the crate's tests.

use crate::{
    connection::{ConnectionHealth, HealthCounters},
    error::MachineError,
    profile::TemperatureZone,
    state::record::StatusFrame,
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Noop-connection will no-op, well, everything.
pub struct NoopConnection {
    open: bool,
    health: Arc<HealthCounters>,
    sent: Arc<std::sync::Mutex<Vec<String>>>,
    frame: Arc<std::sync::Mutex<StatusFrame>>,
    fail_next: Arc<AtomicU32>,
}

/// A handle for steering a [`NoopConnection`] from the outside: set the
/// status it reports, make its next operations fail, inspect what was
/// sent. Clones all steer the same connection.
#[derive(Clone)]
pub struct NoopScript {
    sent: Arc<std::sync::Mutex<Vec<String>>>,
    frame: Arc<std::sync::Mutex<StatusFrame>>,
    fail_next: Arc<AtomicU32>,
}

impl NoopScript {
    /// Report `raw_status` (and nothing else) on the next polls.
    pub fn set_status(&self, raw_status: &str) {
        self.set_frame(StatusFrame::status_only(raw_status));
    }

    /// Report `frame` on the next polls.
    pub fn set_frame(&self, frame: StatusFrame) {
        *lock(&self.frame) = frame;
    }

    /// Make the next `count` operations fail with a timeout.
    pub fn fail_times(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Everything the connection has been asked to do, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Forget the recorded commands.
    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

impl NoopConnection {
    /// A closed noop connection reporting an idle machine.
    pub fn new() -> Self {
        Self {
            open: false,
            health: Arc::new(HealthCounters::default()),
            sent: Arc::new(std::sync::Mutex::new(Vec::new())),
            frame: Arc::new(std::sync::Mutex::new(StatusFrame::status_only("idle"))),
            fail_next: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A steering handle, valid after the connection moves elsewhere.
    pub fn script(&self) -> NoopScript {
        NoopScript {
            sent: self.sent.clone(),
            frame: self.frame.clone(),
            fail_next: self.fail_next.clone(),
        }
    }

    fn take_scripted_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(&self) -> Result<(), MachineError> {
        if !self.open {
            return Err(MachineError::Connection("connection is closed".into()));
        }
        if self.take_scripted_failure() {
            self.health.record_failure();
            return Err(MachineError::Timeout {
                waited: Duration::from_secs(1),
            });
        }
        self.health.record_success();
        Ok(())
    }

    fn record(&self, line: String) {
        lock(&self.sent).push(line);
    }
}

impl Default for NoopConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for NoopConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        if self.take_scripted_failure() {
            return Err(MachineError::Connection("scripted open failure".into()));
        }
        self.open = true;
        self.health.reset();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        self.open = false;
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.open && self.health.within_failure_limit()
    }

    fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }

    async fn send(
        &mut self,
        command: &str,
        _params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, MachineError> {
        self.check()?;
        self.record(command.to_owned());
        Ok(serde_json::Value::Null)
    }
}

impl MachineControl for NoopConnection {
    type Error = MachineError;

    async fn poll_status(&mut self) -> Result<StatusFrame, MachineError> {
        self.check()?;
        Ok(lock(&self.frame).clone())
    }

    async fn start(&mut self, file: &str) -> Result<(), MachineError> {
        self.check()?;
        self.record(format!("start {file}"));
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), MachineError> {
        self.check()?;
        self.record("pause".to_owned());
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), MachineError> {
        self.check()?;
        self.record("resume".to_owned());
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), MachineError> {
        self.check()?;
        self.record("cancel".to_owned());
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), MachineError> {
        self.check()?;
        self.record("emergency stop".to_owned());
        Ok(())
    }
}

impl MotionControl for NoopConnection {
    type Error = MachineError;

    async fn home(&mut self, axes: &[Axis]) -> Result<(), MachineError> {
        self.check()?;
        let mut line = String::from("home");
        for axis in axes {
            line.push(' ');
            line.push_str(&axis.to_string());
        }
        self.record(line);
        Ok(())
    }

    async fn jog(
        &mut self,
        axis: Axis,
        distance_mm: f64,
        _feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        self.check()?;
        self.record(format!("jog {axis} {distance_mm}"));
        Ok(())
    }
}

impl HeaterControl for NoopConnection {
    type Error = MachineError;

    async fn set_temperature(
        &mut self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> Result<(), MachineError> {
        self.check()?;
        self.record(format!("set_temperature {zone} {celsius}"));
        Ok(())
    }
}

impl FileStore for NoopConnection {
    type Error = MachineError;

    async fn upload_file(&mut self, path: &str, content: Bytes) -> Result<(), MachineError> {
        self.check()?;
        self.record(format!("upload {path} ({} bytes)", content.len()));
        Ok(())
    }

    async fn list_files(&mut self, _path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), MachineError> {
        self.check()?;
        self.record(format!("delete {path}"));
        Ok(())
    }
}
