//! The universal state model. Every vendor vocabulary, whatever its wire
//! format, normalizes into [MachineState]; downstream consumers only ever
//! see this enum.

pub mod record;
pub mod tracker;

use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The lifecycle state of a machine, vendor-neutral.
#[derive(
    Clone, Copy, Debug, Default, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// No live transport to the device.
    Disconnected,

    /// A transport is being established or re-established.
    Connecting,

    /// Connected and ready to accept work.
    Idle,

    /// Getting ready to run: heating, homing, loading.
    Preparing,

    /// Actively executing a job.
    Running,

    /// A pause was requested and is taking effect.
    Pausing,

    /// Execution suspended; resumable.
    Paused,

    /// A resume was requested and is taking effect.
    Resuming,

    /// Flushing the final moves of a job.
    Completing,

    /// The last job finished successfully.
    Complete,

    /// A cancel was requested and is taking effect.
    Cancelling,

    /// The last job was cancelled before finishing.
    Cancelled,

    /// The device reported a fault, or an operator forced a halt.
    Error,

    /// Operator servicing: filament load, calibration, tool change.
    Maintenance,

    /// The vendor reported something we could not map.
    #[default]
    Unknown,
}

impl MachineState {
    /// Dashboard color hint for this state.
    pub fn color(&self) -> &'static str {
        match self {
            MachineState::Disconnected | MachineState::Unknown => "gray",
            MachineState::Connecting
            | MachineState::Preparing
            | MachineState::Pausing
            | MachineState::Resuming
            | MachineState::Cancelling => "yellow",
            MachineState::Idle | MachineState::Complete => "green",
            MachineState::Running | MachineState::Completing => "blue",
            MachineState::Paused | MachineState::Cancelled => "orange",
            MachineState::Error => "red",
            MachineState::Maintenance => "purple",
        }
    }

    /// True for states in which no job can still be live.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MachineState::Complete
                | MachineState::Cancelled
                | MachineState::Error
                | MachineState::Disconnected
        )
    }

    /// Whether moving from `self` to `next` is an expected transition.
    ///
    /// The rules are permissive on purpose: devices reboot, operators poke
    /// touchscreens, and vendors skip intermediate states. Same-state is
    /// always fine, leaving [MachineState::Unknown] is always fine, and
    /// entering it never is. Callers log violations and apply them anyway;
    /// the table exists to make the log trustworthy, not to fight reality.
    pub fn can_transition_to(&self, next: MachineState) -> bool {
        use MachineState::*;

        if *self == next {
            return true;
        }
        if next == Unknown {
            return false;
        }
        if *self == Unknown {
            return true;
        }

        matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, _)
                | (Idle, Disconnected | Preparing | Running | Maintenance | Error)
                | (Preparing, Running | Idle | Cancelling | Cancelled | Error | Disconnected)
                | (
                    Running,
                    Pausing | Paused | Completing | Complete | Cancelling | Cancelled | Error | Disconnected,
                )
                | (Pausing, Paused | Running | Cancelling | Error | Disconnected)
                | (Paused, Resuming | Running | Cancelling | Cancelled | Error | Disconnected)
                | (Resuming, Running | Paused | Error | Disconnected)
                | (Completing, Complete | Idle | Error | Disconnected)
                | (Complete, Idle | Preparing | Running | Maintenance | Error | Disconnected)
                | (Cancelling, Cancelled | Idle | Error | Disconnected)
                | (Cancelled, Idle | Preparing | Running | Maintenance | Error | Disconnected)
                | (Error, Idle | Connecting | Maintenance | Disconnected)
                | (Maintenance, Idle | Error | Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::MachineState::*;

    #[test]
    fn same_state_is_always_valid() {
        for state in [Disconnected, Running, Error, Unknown] {
            assert!(state.can_transition_to(state));
        }
    }

    #[test]
    fn unknown_rules() {
        assert!(Unknown.can_transition_to(Running));
        assert!(Unknown.can_transition_to(Disconnected));
        assert!(!Running.can_transition_to(Unknown));
        assert!(!Disconnected.can_transition_to(Unknown));
    }

    #[test]
    fn ordinary_job_lifecycle() {
        assert!(Idle.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Running));
        assert!(Running.can_transition_to(Pausing));
        assert!(Pausing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Resuming));
        assert!(Resuming.can_transition_to(Running));
        assert!(Running.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Complete));
        assert!(Complete.can_transition_to(Idle));
    }

    #[test]
    fn surprising_jumps_are_flagged() {
        assert!(!Disconnected.can_transition_to(Running));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Paused));
        assert!(!Complete.can_transition_to(Paused));
    }

    #[test]
    fn text_round_trip() {
        assert_eq!(Running.to_string(), "running");
        assert_eq!("emergency".parse::<super::MachineState>().ok(), None);
        assert_eq!("maintenance".parse::<super::MachineState>().ok(), Some(Maintenance));
    }

    #[test]
    fn terminal_states_drop_jobs() {
        assert!(Complete.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Error.is_terminal());
        assert!(Disconnected.is_terminal());
        assert!(!Paused.is_terminal());
        assert!(!Running.is_terminal());
    }
}
