use anyhow::Result;
use clap::{Parser, Subcommand};
use machine_hub::config::Config;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cmd_discover;
mod cmd_exec;
mod cmd_run;
mod cmd_status;

/// Talk to the workshop's machines from one place.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "machine-hub")]
struct Cli {
    /// Config file to use.
    #[arg(long, short, default_value = "machine-hub.toml")]
    config: PathBuf,

    /// Verbosity of logging output [trace, debug, info, warn, error].
    #[arg(long, short, default_value = "info")]
    log_level: String,

    /// Emit log lines as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every configured machine, watch discovery for new ones, and
    /// keep state fresh until interrupted.
    Run,

    /// Run one discovery pass and print every device that answered.
    Discover,

    /// Connect the configured machines and print what they are doing.
    Status {
        /// Only this machine id.
        id: Option<String>,
    },

    /// Connect one configured machine and send it a single command.
    Exec {
        /// The machine id from the config file.
        id: String,

        #[command(subcommand)]
        command: cmd_exec::ExecCommands,
    },
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))?;

    if cli.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = Config::from_file(&cli.config)?;

    match &cli.command {
        Commands::Run => cmd_run::main(&cli, &config).await,
        Commands::Discover => cmd_discover::main(&cli, &config).await,
        Commands::Status { id } => cmd_status::main(&cli, &config, id.as_deref()).await,
        Commands::Exec { id, command } => cmd_exec::main(&cli, &config, id, command).await,
    }
}
