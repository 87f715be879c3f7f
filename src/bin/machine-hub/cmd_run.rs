use super::Cli;
use anyhow::Result;
use machine_hub::{config::Config, discover::DiscoveryService, manager::MachineManager};

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGINT handler");
            e
        })?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGTERM handler");
            e
        })?;

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await.map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up Ctrl+C handler");
            anyhow::Error::new(e)
        })?;

        tracing::info!("received Ctrl+C (SIGINT)");
    }

    Ok(())
}

pub async fn main(_cli: &Cli, config: &Config) -> Result<()> {
    let manager = MachineManager::from_config(config).await;
    manager.start().await;

    let discovery = DiscoveryService::new(config.discovery.strategies());
    manager.attach_discovery(&discovery).await;
    if config.discovery.continuous {
        discovery.start(config.discovery.interval()).await;
    } else {
        discovery.run_once().await;
    }

    tracing::info!(machines = manager.list().await.len(), "machine hub is up");

    wait_for_shutdown().await?;

    tracing::info!("triggering cleanup...");
    discovery.stop().await;
    manager.shutdown().await;
    tracing::info!("all clean, exiting!");
    Ok(())
}
