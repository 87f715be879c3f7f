//! The error taxonomy callers branch on. Every transport maps its native
//! failures into these kinds so retry and dispatch logic never has to know
//! which vendor produced them.

use crate::{profile::MachineCategory, state::MachineState};
use std::time::Duration;

/// Errors produced by connections, machines and the manager.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// The transport could not be established or dropped mid-operation.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The remote side rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// No reply arrived within the deadline.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long we waited before giving up.
        waited: Duration,
    },

    /// The operation is not allowed in the machine's current state.
    #[error("cannot {op} while {state}")]
    InvalidState {
        /// The operation that was refused.
        op: &'static str,
        /// The state the machine was in.
        state: MachineState,
    },

    /// A request argument failed validation before anything was sent.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No machine is registered under the given id.
    #[error("no machine registered under id {0:?}")]
    UnknownDevice(String),

    /// The operation is not supported by this machine or its transport.
    #[error("{op} is not supported by this machine")]
    Unsupported {
        /// The operation that was refused.
        op: &'static str,
        /// The category that lacks it.
        category: MachineCategory,
    },

    /// The remote side answered outside the dialect's contract.
    #[error("protocol error (status {status}): {message}")]
    Protocol {
        /// HTTP status code, or 0 for non-HTTP protocol faults.
        status: u16,
        /// Short description of what came back.
        message: String,
    },
}

impl MachineError {
    /// Whether retrying the same operation can plausibly succeed.
    ///
    /// Authentication and validation failures are permanent: retrying them
    /// hammers the device without ever changing the answer.
    pub fn is_transient(&self) -> bool {
        match self {
            MachineError::Connection(_) | MachineError::Timeout { .. } => true,
            MachineError::Protocol { status, .. } => *status >= 500,
            MachineError::Auth(_)
            | MachineError::InvalidState { .. }
            | MachineError::InvalidParameter(_)
            | MachineError::UnknownDevice(_)
            | MachineError::Unsupported { .. } => false,
        }
    }
}
