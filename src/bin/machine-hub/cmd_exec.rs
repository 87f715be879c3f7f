use super::Cli;
use anyhow::Result;
use clap::Subcommand;
use machine_hub::{
    config::Config,
    manager::{MachineCommand, MachineManager},
    profile::TemperatureZone,
    Axis,
};

/// One machine command, as typed at the shell.
#[derive(Subcommand)]
pub enum ExecCommands {
    /// Start a stored job.
    Start {
        /// File name or path on the machine.
        file: String,
    },

    /// Pause the running job.
    Pause,

    /// Resume the paused job.
    Resume,

    /// Cancel the current job.
    Cancel,

    /// Home axes; all of them when none are named.
    Home {
        /// Axes to home, e.g. `x y`.
        axes: Vec<String>,
    },

    /// Move one axis by a signed distance in millimeters.
    Jog {
        /// The axis to move.
        axis: String,

        /// Signed distance, millimeters.
        distance_mm: f64,

        /// Feedrate, millimeters per minute.
        #[arg(long)]
        feedrate: Option<f64>,
    },

    /// Set a heater zone's target, degrees Celsius.
    SetTemp {
        /// extruder, bed or chamber.
        zone: String,

        /// Target temperature.
        celsius: f64,
    },

    /// Hard stop, callable from any state.
    EmergencyStop,

    /// List the machine's stored files.
    Files {
        /// Subtree to list.
        path: Option<String>,
    },

    /// Delete a stored file.
    Delete {
        /// Path of the file to delete.
        path: String,
    },
}

fn parse_axis(axis: &str) -> Result<Axis> {
    axis.to_uppercase()
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown axis {axis:?}, expected one of x, y, z"))
}

fn to_machine_command(command: &ExecCommands) -> Result<MachineCommand> {
    Ok(match command {
        ExecCommands::Start { file } => MachineCommand::Start { file: file.clone() },
        ExecCommands::Pause => MachineCommand::Pause,
        ExecCommands::Resume => MachineCommand::Resume,
        ExecCommands::Cancel => MachineCommand::Cancel,
        ExecCommands::Home { axes } => MachineCommand::Home {
            axes: axes
                .iter()
                .map(|axis| parse_axis(axis))
                .collect::<Result<Vec<Axis>>>()?,
        },
        ExecCommands::Jog {
            axis,
            distance_mm,
            feedrate,
        } => MachineCommand::Jog {
            axis: parse_axis(axis)?,
            distance_mm: *distance_mm,
            feedrate_mm_min: *feedrate,
        },
        ExecCommands::SetTemp { zone, celsius } => MachineCommand::SetTemperature {
            zone: zone.parse::<TemperatureZone>().map_err(|_| {
                anyhow::anyhow!("unknown zone {zone:?}, expected extruder, bed or chamber")
            })?,
            celsius: *celsius,
        },
        ExecCommands::EmergencyStop => MachineCommand::EmergencyStop,
        ExecCommands::Files { path } => MachineCommand::ListFiles { path: path.clone() },
        ExecCommands::Delete { path } => MachineCommand::DeleteFile { path: path.clone() },
    })
}

pub async fn main(_cli: &Cli, config: &Config, id: &str, command: &ExecCommands) -> Result<()> {
    let machine_command = to_machine_command(command)?;

    let manager = MachineManager::from_config(config).await;
    manager.start().await;

    let result = manager.execute(id, machine_command).await;
    manager.shutdown().await;

    let outcome = result?;
    println!("{}", outcome.message);
    if let Some(data) = outcome.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}
