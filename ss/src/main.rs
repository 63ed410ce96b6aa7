use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use statestore::cli::{Cli, Command};
use statestore::config::Config;
use statestore::{FileLayer, StateLayer};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("statestore starting");

    let layer = FileLayer::open(&config.store_path).context("Failed to open state store")?;

    match cli.command {
        Command::List => {
            let mut keys = layer.keys().await?;
            keys.sort();
            if keys.is_empty() {
                println!("No sessions found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        Command::Show { session_id } => match layer.load(&session_id).await? {
            Some(record) => {
                println!("Session: {}", record.session_id.cyan());
                println!("  Version: {}", record.version);
                println!("  Created: {}", record.created_at);
                println!("  Updated: {}", record.updated_at);
                println!("{}", serde_json::to_string_pretty(&record.context)?);
            }
            None => {
                println!("{} Session not found: {}", "✗".red(), session_id);
            }
        },
        Command::Delete { session_id } => {
            layer.delete(&session_id).await?;
            println!("{} Deleted session: {}", "✓".green(), session_id);
        }
        Command::Cleanup { days } => {
            let removed = layer.cleanup_old(days)?;
            println!("{} Removed {} old session file(s)", "✓".green(), removed);
        }
    }

    Ok(())
}
