use super::Cli;
use anyhow::Result;
use machine_hub::{config::Config, manager::MachineManager};

pub async fn main(_cli: &Cli, config: &Config, id: Option<&str>) -> Result<()> {
    let manager = MachineManager::from_config(config).await;
    manager.start().await;

    let result = print_status(&manager, id).await;
    manager.shutdown().await;
    result
}

async fn print_status(manager: &MachineManager, id: Option<&str>) -> Result<()> {
    match id {
        Some(id) => {
            let status = manager.status(id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        None => {
            for row in manager.list().await {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.id,
                    row.category,
                    row.state,
                    if row.connected { "connected" } else { "unreachable" }
                );
            }
        }
    }
    Ok(())
}
