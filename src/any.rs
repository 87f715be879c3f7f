use crate::{
    connection::ConnectionHealth,
    error::MachineError,
    profile::TemperatureZone,
    state::record::StatusFrame,
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;

/// AnyConnection is any supported transport.
pub enum AnyConnection {
    /// Direct serial line to the controller board.
    #[cfg(feature = "serial")]
    Serial(crate::connection::serial::SerialConnection),

    /// OctoPrint-style REST server.
    #[cfg(feature = "octoprint")]
    OctoPrint(crate::octoprint::OctoPrintConnection),

    /// PrusaLink-style REST controller.
    #[cfg(feature = "prusalink")]
    PrusaLink(crate::prusalink::PrusaLinkConnection),

    /// The connection to nowhere.
    Noop(crate::noop::NoopConnection),
}

#[cfg(feature = "serial")]
mod _serial {
    use super::*;

    impl From<crate::connection::serial::SerialConnection> for AnyConnection {
        fn from(connection: crate::connection::serial::SerialConnection) -> Self {
            Self::Serial(connection)
        }
    }
}

#[cfg(feature = "octoprint")]
mod _octoprint {
    use super::*;

    impl From<crate::octoprint::OctoPrintConnection> for AnyConnection {
        fn from(connection: crate::octoprint::OctoPrintConnection) -> Self {
            Self::OctoPrint(connection)
        }
    }
}

#[cfg(feature = "prusalink")]
mod _prusalink {
    use super::*;

    impl From<crate::prusalink::PrusaLinkConnection> for AnyConnection {
        fn from(connection: crate::prusalink::PrusaLinkConnection) -> Self {
            Self::PrusaLink(connection)
        }
    }
}

mod _noop {
    use super::*;

    impl From<crate::noop::NoopConnection> for AnyConnection {
        fn from(connection: crate::noop::NoopConnection) -> Self {
            Self::Noop(connection)
        }
    }
}

macro_rules! for_all {
    (|$slf:ident, $connection:ident| $body:block) => {
        match $slf {
            #[cfg(feature = "serial")]
            Self::Serial($connection) => $body,

            #[cfg(feature = "octoprint")]
            Self::OctoPrint($connection) => $body,

            #[cfg(feature = "prusalink")]
            Self::PrusaLink($connection) => $body,

            Self::Noop($connection) => $body,
        }
    };
}

impl Connection for AnyConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.open().await })
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.close().await })
    }

    fn healthy(&self) -> bool {
        for_all!(|self, connection| { connection.healthy() })
    }

    fn health(&self) -> ConnectionHealth {
        for_all!(|self, connection| { connection.health() })
    }

    async fn send(
        &mut self,
        command: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, MachineError> {
        for_all!(|self, connection| { connection.send(command, params).await })
    }
}

impl MachineControl for AnyConnection {
    type Error = MachineError;

    async fn poll_status(&mut self) -> Result<StatusFrame, MachineError> {
        for_all!(|self, connection| { connection.poll_status().await })
    }

    async fn start(&mut self, file: &str) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.start(file).await })
    }

    async fn pause(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.pause().await })
    }

    async fn resume(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.resume().await })
    }

    async fn cancel(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.cancel().await })
    }

    async fn emergency_stop(&mut self) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.emergency_stop().await })
    }
}

impl MotionControl for AnyConnection {
    type Error = MachineError;

    async fn home(&mut self, axes: &[Axis]) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.home(axes).await })
    }

    async fn jog(
        &mut self,
        axis: Axis,
        distance_mm: f64,
        feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.jog(axis, distance_mm, feedrate_mm_min).await })
    }
}

impl HeaterControl for AnyConnection {
    type Error = MachineError;

    async fn set_temperature(
        &mut self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.set_temperature(zone, celsius).await })
    }
}

impl FileStore for AnyConnection {
    type Error = MachineError;

    async fn upload_file(&mut self, path: &str, content: Bytes) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.upload_file(path, content).await })
    }

    async fn list_files(&mut self, path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        for_all!(|self, connection| { connection.list_files(path).await })
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), MachineError> {
        for_all!(|self, connection| { connection.delete_file(path).await })
    }
}
