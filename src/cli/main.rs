use clap::Parser;
use uuid::Uuid;

use lxcd::daemon::Driver;
use lxcd::error::DriverError;

#[path = "mod.rs"]
mod cli;
use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let driver = match Driver::startup().await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to start driver: {}", e);
            std::process::exit(1);
        }
    };

    let result = run(&driver, cli.command).await;
    driver.shutdown().await;

    if let Err(e) = result {
        eprintln!("error ({}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

async fn run(driver: &Driver, command: Command) -> Result<(), DriverError> {
    match command {
        Command::Define { path } => {
            let json = std::fs::read_to_string(&path).map_err(DriverError::from)?;
            let uuid = driver.define(&json).await?;
            println!("{}", uuid);
        }
        Command::Undefine { uuid } => {
            driver.undefine(parse_uuid(&uuid)?).await?;
        }
        Command::Start { uuid } => {
            let runtime_id = driver.start(parse_uuid(&uuid)?).await?;
            println!("{}", runtime_id);
        }
        Command::CreateAndStart { path } => {
            let json = std::fs::read_to_string(&path).map_err(DriverError::from)?;
            let (uuid, runtime_id) = driver.create_and_start(&json).await?;
            println!("{} {}", uuid, runtime_id);
        }
        Command::Destroy { uuid } => {
            driver.destroy(parse_uuid(&uuid)?).await?;
        }
        Command::ShutdownGraceful { uuid } => {
            driver.shutdown_graceful(parse_uuid(&uuid)?).await?;
        }
        Command::LookupId { id } => {
            let record = driver.lookup_by_id(id).await?;
            println!("{} {}", record.definition.uuid, record.definition.name);
        }
        Command::LookupUuid { uuid } => {
            let record = driver.lookup_by_uuid(parse_uuid(&uuid)?).await?;
            println!("{}", record.definition.name);
        }
        Command::LookupName { name } => {
            let record = driver.lookup_by_name(&name).await?;
            println!("{}", record.definition.uuid);
        }
        Command::ListActive { limit } => {
            for id in driver.list_active_ids(limit).await {
                println!("{}", id);
            }
        }
        Command::ListInactive { limit } => {
            for name in driver.list_inactive_names(limit).await {
                println!("{}", name);
            }
        }
        Command::Info { uuid } => {
            let info = driver.get_info(parse_uuid(&uuid)?).await?;
            println!("{:?}", info);
        }
        Command::Dump { uuid } => {
            let json = driver.dump_definition(parse_uuid(&uuid)?).await?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn parse_uuid(s: &str) -> Result<Uuid, DriverError> {
    Uuid::parse_str(s).map_err(|e| DriverError::InvalidDomain(format!("invalid uuid '{}': {}", s, e)))
}
