use super::Cli;
use anyhow::Result;
use machine_hub::{config::Config, discover::DiscoveryService};

pub async fn main(_cli: &Cli, config: &Config) -> Result<()> {
    let discovery = DiscoveryService::new(config.discovery.strategies());

    tracing::debug!("starting discovery pass");
    discovery.run_once().await;

    let devices = discovery.discovered();
    if devices.is_empty() {
        println!("no devices answered");
        return Ok(());
    }
    for device in devices {
        println!(
            "[{}] {} {} ({})",
            device.protocol, device.id, device.label, device.category
        );
    }
    Ok(())
}
