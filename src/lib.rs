#![allow(refining_impl_trait)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate implements support for talking to workshop fabrication
//! machines over serial lines and the REST dialects their controllers
//! speak, normalizing every vendor's vocabulary into one state model and
//! one command surface.

mod any;
pub mod config;
pub mod connection;
pub mod discover;
mod error;
pub mod machine;
pub mod manager;
mod noop;
#[cfg(feature = "octoprint")]
pub mod octoprint;
pub mod profile;
#[cfg(feature = "prusalink")]
pub mod prusalink;
mod retry;
pub mod state;
mod traits;

pub use any::AnyConnection;
pub use error::MachineError;
pub use machine::Machine;
pub use manager::{CommandOutcome, MachineCommand, MachineManager, MachineStatus, MachineSummary};
pub use noop::{NoopConnection, NoopScript};
pub use retry::BackoffPolicy;
pub use traits::{Connection, Discover, FileStore, HeaterControl, MachineControl, MotionControl};

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One linear axis of a machine's motion system.
#[derive(
    Clone, Copy, Debug, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Left and right.
    X,

    /// Front to back.
    Y,

    /// Up and down, or spindle depth.
    Z,
}

/// One file on a machine's storage, as a listing reports it.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Display name.
    pub name: String,

    /// Path on the machine; what start and delete take.
    pub path: String,

    /// Size in bytes, when the machine reports one.
    #[serde(default)]
    pub size: Option<u64>,

    /// Last modification time, when the machine reports one.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}
