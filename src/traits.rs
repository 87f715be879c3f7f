//! Common traits implemented by every connection transport. The base
//! [Connection] contract is the wire-level surface; the typed traits on top
//! of it are what the machine abstraction actually drives.

use crate::{
    connection::ConnectionHealth,
    discover::DeviceDescriptor,
    profile::TemperatureZone,
    state::record::StatusFrame,
    Axis, StoredFile,
};
use bytes::Bytes;
use std::{error::Error, future::Future};
use tokio::sync::mpsc::Sender;

/// The wire-level contract every transport honors: lifecycle, health and a
/// transport-native command escape hatch. For serial transports `send` takes
/// a raw command line; for REST transports it takes `"METHOD path"` plus an
/// optional JSON body.
pub trait Connection {
    /// Error type returned by this trait.
    type Error: Error;

    /// Establish the transport. Idempotent on an already-open connection.
    fn open(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Tear the transport down, stopping any background reader first.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Whether the transport is open and under the failure limit.
    fn healthy(&self) -> bool;

    /// Snapshot of the health counters.
    fn health(&self) -> ConnectionHealth;

    /// Send one transport-native command and return its reply.
    fn send(
        &mut self,
        command: &str,
        params: Option<&serde_json::Value>,
    ) -> impl Future<Output = Result<serde_json::Value, Self::Error>>;
}

/// Core job control every transport exposes in its own dialect.
pub trait MachineControl {
    /// Error type returned by this trait.
    type Error: Error;

    /// Fetch one telemetry frame: the vendor state word plus whatever
    /// job, temperature and position data the dialect reports.
    fn poll_status(&mut self) -> impl Future<Output = Result<StatusFrame, Self::Error>>;

    /// Start a stored job by file name or path.
    fn start(&mut self, file: &str) -> impl Future<Output = Result<(), Self::Error>>;

    /// Pause the running job.
    fn pause(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Resume the paused job.
    fn resume(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Cancel the current job.
    fn cancel(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// The most aggressive stop this transport can express. Callers do not
    /// gate this on state; it must fire even when nothing seems to be
    /// running.
    fn emergency_stop(&mut self) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Axis motion for transports that can move the head or gantry directly.
pub trait MotionControl {
    /// Error type returned by this trait.
    type Error: Error;

    /// Home the given axes, or all of them when none are named.
    fn home(&mut self, axes: &[Axis]) -> impl Future<Output = Result<(), Self::Error>>;

    /// Relative move of one axis by `distance_mm`, optionally at
    /// `feedrate_mm_min`.
    fn jog(
        &mut self,
        axis: Axis,
        distance_mm: f64,
        feedrate_mm_min: Option<f64>,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Heater control for transports with addressable temperature zones.
pub trait HeaterControl {
    /// Error type returned by this trait.
    type Error: Error;

    /// Set one zone's target temperature, degrees Celsius.
    fn set_temperature(
        &mut self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// File storage operations for transports with reachable storage.
pub trait FileStore {
    /// Error type returned by this trait.
    type Error: Error;

    /// Store `content` under `path` on the machine.
    fn upload_file(
        &mut self,
        path: &str,
        content: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// List storage, optionally below `path`.
    fn list_files(
        &mut self,
        path: Option<&str>,
    ) -> impl Future<Output = Result<Vec<StoredFile>, Self::Error>>;

    /// Delete the file at `path`.
    fn delete_file(&mut self, path: &str) -> impl Future<Output = Result<(), Self::Error>>;
}

/// One discovery strategy: a single bounded scan pass that sends every
/// candidate it sees down `found` and returns when the pass is over.
/// Dedup and announcement policy belong to the service running the pass,
/// not to implementers.
pub trait Discover {
    /// Error type returned by this trait.
    type Error: Error;

    /// Run one scan pass.
    fn discover(
        &self,
        found: Sender<DeviceDescriptor>,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}
