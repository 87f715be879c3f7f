//! Category-keyed device profiles: what a kind of machine can do, how hot
//! it is allowed to get, and how its vendors' status words map into the
//! universal state model.

use crate::{discover::TransportProtocol, state::MachineState};
use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The broad kind of machine a profile describes.
#[derive(
    Clone, Copy, Debug, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MachineCategory {
    /// Filament deposition 3D printer.
    FdmPrinter,

    /// CNC router or mill.
    Cnc,

    /// Laser cutter or engraver.
    Laser,
}

/// One operation a category of machine supports. Emergency stop is not
/// listed: every machine has one.
#[derive(
    Clone, Copy, Debug, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Start a stored job.
    Start,

    /// Pause the running job.
    Pause,

    /// Resume a paused job.
    Resume,

    /// Cancel the current job.
    Cancel,

    /// Home one or more axes.
    Home,

    /// Relative moves of a single axis.
    Jog,

    /// Set heater target temperatures.
    SetTemperature,

    /// Upload a file to machine storage.
    UploadFile,

    /// List machine storage.
    ListFiles,

    /// Delete a file from machine storage.
    DeleteFile,
}

/// A heated zone addressable by temperature commands.
#[derive(
    Clone, Copy, Debug, Display, Eq, FromStr, Hash, JsonSchema, PartialEq, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TemperatureZone {
    /// Hotend or nozzle.
    Extruder,

    /// Heated build plate.
    Bed,

    /// Enclosed build chamber.
    Chamber,
}

/// Static description of one machine category.
#[derive(Debug)]
pub struct MachineProfile {
    /// The category this profile describes.
    pub category: MachineCategory,

    /// Human-readable name.
    pub name: &'static str,

    /// Operations machines of this category support.
    pub capabilities: Vec<Capability>,

    /// Transports machines of this category can be reached over.
    pub transports: Vec<TransportProtocol>,

    /// Hard ceilings per heated zone, degrees Celsius. Zones absent here
    /// cannot be heated at all.
    pub temperature_limits: HashMap<TemperatureZone, f64>,

    /// Telemetry channels a healthy poll is expected to carry.
    pub required_telemetry: Vec<&'static str>,

    status_map: HashMap<&'static str, MachineState>,
}

impl MachineProfile {
    /// Whether this category supports an operation.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Whether machines of this category can be driven over a transport.
    pub fn supports_transport(&self, protocol: TransportProtocol) -> bool {
        self.transports.contains(&protocol)
    }

    /// The hard ceiling for a zone, or None when the zone has no heater.
    pub fn temperature_ceiling(&self, zone: TemperatureZone) -> Option<f64> {
        self.temperature_limits.get(&zone).copied()
    }

    /// Map a vendor status word into the universal state model. Matching is
    /// exact after trimming and lowercasing; anything unmapped becomes
    /// [MachineState::Unknown].
    pub fn normalize_status(&self, raw: &str) -> MachineState {
        let key = raw.trim().to_lowercase();
        match self.status_map.get(key.as_str()) {
            Some(state) => *state,
            None => {
                tracing::debug!(category = %self.category, raw = %raw, "unmapped vendor status word");
                MachineState::Unknown
            }
        }
    }
}

macro_rules! machine_profiles {
    ($(
        $category:ident => $static_name:ident {
            name: $name:expr,
            capabilities: [$($cap:ident),* $(,)?],
            transports: [$($transport:ident),* $(,)?],
            temperature_limits: {$($zone:ident: $limit:expr),* $(,)?},
            required_telemetry: [$($chan:expr),* $(,)?],
            status_map: {$($raw:expr => $state:ident),* $(,)?},
        }
    )*) => {
        lazy_static::lazy_static! {
            $(
                static ref $static_name: MachineProfile = MachineProfile {
                    category: MachineCategory::$category,
                    name: $name,
                    capabilities: vec![$(Capability::$cap),*],
                    transports: vec![$(TransportProtocol::$transport),*],
                    temperature_limits: HashMap::from([$((TemperatureZone::$zone, $limit)),*]),
                    required_telemetry: vec![$($chan),*],
                    status_map: HashMap::from([$(($raw, MachineState::$state)),*]),
                };
            )*
        }

        impl MachineProfile {
            /// The static profile for a category.
            pub fn for_category(category: MachineCategory) -> &'static MachineProfile {
                match category {
                    $(MachineCategory::$category => &$static_name,)*
                }
            }
        }
    };
}

machine_profiles! {
    FdmPrinter => FDM_PRINTER {
        name: "FDM printer",
        capabilities: [
            Start, Pause, Resume, Cancel, Home, Jog, SetTemperature,
            UploadFile, ListFiles, DeleteFile,
        ],
        transports: [Serial, OctoPrint, PrusaLink],
        temperature_limits: {Extruder: 300.0, Bed: 120.0, Chamber: 60.0},
        required_telemetry: ["temperatures"],
        status_map: {
            "operational" => Idle,
            "ready" => Idle,
            "idle" => Idle,
            "printing" => Running,
            "sd printing" => Running,
            "busy" => Preparing,
            "pausing" => Pausing,
            "paused" => Paused,
            "resuming" => Resuming,
            "finishing" => Completing,
            "finished" => Complete,
            "complete" => Complete,
            "cancelling" => Cancelling,
            "stopped" => Cancelled,
            "error" => Error,
            "offline after error" => Error,
            "attention" => Maintenance,
            "maintenance" => Maintenance,
            "offline" => Disconnected,
            "closed" => Disconnected,
            "connecting" => Connecting,
            "opening serial connection" => Connecting,
        },
    }

    Cnc => CNC_ROUTER {
        name: "CNC router",
        capabilities: [Pause, Resume, Cancel, Home, Jog],
        transports: [Serial],
        temperature_limits: {},
        required_telemetry: ["position"],
        status_map: {
            "idle" => Idle,
            "run" => Running,
            "jog" => Running,
            "hold" => Paused,
            "hold:0" => Paused,
            "hold:1" => Pausing,
            "door" => Maintenance,
            "door:0" => Maintenance,
            "door:1" => Maintenance,
            "home" => Preparing,
            "check" => Maintenance,
            "sleep" => Idle,
            "alarm" => Error,
        },
    }

    Laser => LASER_CUTTER {
        name: "laser cutter",
        capabilities: [Pause, Resume, Cancel, Home, Jog],
        transports: [Serial],
        temperature_limits: {},
        required_telemetry: ["position"],
        status_map: {
            "idle" => Idle,
            "run" => Running,
            "jog" => Running,
            "hold" => Paused,
            "hold:0" => Paused,
            "hold:1" => Pausing,
            "door" => Maintenance,
            "door:0" => Maintenance,
            "door:1" => Maintenance,
            "home" => Preparing,
            "check" => Maintenance,
            "sleep" => Idle,
            "alarm" => Error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_matching_ignores_case_and_padding() {
        let profile = MachineProfile::for_category(MachineCategory::FdmPrinter);
        assert_eq!(profile.normalize_status("PRINTING"), MachineState::Running);
        assert_eq!(profile.normalize_status("  Paused "), MachineState::Paused);
        assert_eq!(profile.normalize_status("Offline After Error"), MachineState::Error);
    }

    #[test]
    fn unmapped_word_becomes_unknown() {
        let profile = MachineProfile::for_category(MachineCategory::FdmPrinter);
        assert_eq!(profile.normalize_status("defrobulating"), MachineState::Unknown);
        assert_eq!(profile.normalize_status(""), MachineState::Unknown);
    }

    #[test]
    fn grbl_vocabulary() {
        let profile = MachineProfile::for_category(MachineCategory::Cnc);
        assert_eq!(profile.normalize_status("Hold:0"), MachineState::Paused);
        assert_eq!(profile.normalize_status("Alarm"), MachineState::Error);
        assert_eq!(profile.normalize_status("Home"), MachineState::Preparing);
    }

    #[test]
    fn capability_gates() {
        let printer = MachineProfile::for_category(MachineCategory::FdmPrinter);
        assert!(printer.has_capability(Capability::SetTemperature));

        let cnc = MachineProfile::for_category(MachineCategory::Cnc);
        assert!(!cnc.has_capability(Capability::SetTemperature));
        assert!(cnc.has_capability(Capability::Jog));
        assert!(!cnc.has_capability(Capability::Start));
    }

    #[test]
    fn transport_gates() {
        let printer = MachineProfile::for_category(MachineCategory::FdmPrinter);
        assert!(printer.supports_transport(TransportProtocol::Serial));
        assert!(printer.supports_transport(TransportProtocol::OctoPrint));

        let cnc = MachineProfile::for_category(MachineCategory::Cnc);
        assert!(cnc.supports_transport(TransportProtocol::Serial));
        assert!(!cnc.supports_transport(TransportProtocol::PrusaLink));
    }

    #[test]
    fn temperature_ceilings() {
        let printer = MachineProfile::for_category(MachineCategory::FdmPrinter);
        assert_eq!(printer.temperature_ceiling(TemperatureZone::Extruder), Some(300.0));
        assert_eq!(printer.temperature_ceiling(TemperatureZone::Bed), Some(120.0));

        let laser = MachineProfile::for_category(MachineCategory::Laser);
        assert_eq!(laser.temperature_ceiling(TemperatureZone::Extruder), None);
    }
}
