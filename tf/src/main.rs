use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use taskfabric::cli::{Cli, Command};
use taskfabric::config::FabricConfig;
use taskfabric::dlq::{DeadLetterQueue, DlqItemStatus};

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();
    Ok(())
}

fn status_colored(status: DlqItemStatus) -> ColoredString {
    match status {
        DlqItemStatus::Pending => "pending".yellow(),
        DlqItemStatus::Processing => "processing".blue(),
        DlqItemStatus::Retrying => "retrying".yellow(),
        DlqItemStatus::Failed => "failed".red(),
        DlqItemStatus::Success => "success".green(),
        DlqItemStatus::Discarded => "discarded".dimmed(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = FabricConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("taskfabric operator tool starting");

    let dlq = DeadLetterQueue::new(config.dlq.clone()).context("Failed to open dead-letter storage")?;
    dlq.load().await.context("Failed to load dead-letter items")?;

    match cli.command {
        Command::List { status, operation_type } => {
            let items = dlq.list_items(status, operation_type.as_deref()).await;
            if items.is_empty() {
                println!("No items found");
            } else {
                for item in items {
                    println!(
                        "{}  p{}  {}  {}  retries {}/{}",
                        item.id.cyan(),
                        item.priority,
                        status_colored(item.status),
                        item.operation_type,
                        item.retry_count,
                        item.max_retries,
                    );
                }
            }
        }
        Command::Show { id } => match dlq.get_item(&id).await {
            Some(item) => {
                println!("{}", serde_json::to_string_pretty(&item)?);
            }
            None => {
                println!("{} Item not found: {}", "✗".red(), id);
            }
        },
        Command::Requeue { id } => {
            dlq.requeue_item(&id).await?;
            println!("{} Requeued item: {}", "✓".green(), id);
        }
        Command::Discard { id, reason } => {
            dlq.discard_item(&id, &reason).await?;
            println!("{} Discarded item: {}", "✓".green(), id);
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.dlq.retention_days);
            let removed = dlq.cleanup_old_items(days).await;
            println!("{} Removed {} old item(s)", "✓".green(), removed);
        }
        Command::Stats => {
            let stats = dlq.stats().await;
            println!("Dead-letter queue: {}", config.dlq.storage_path.display());
            println!("  Items: {}", stats.current_items);
            println!("  Enqueued (lifetime): {}", stats.total_enqueued);
            println!("  Succeeded: {}", stats.total_success);
            println!("  Failed: {}", stats.total_failed);
            println!("  Discarded: {}", stats.total_discarded);
            let mut statuses: Vec<_> = stats.status_breakdown.iter().collect();
            statuses.sort();
            for (status, count) in statuses {
                println!("    {}: {}", status, count);
            }
            if !stats.handlers_registered.is_empty() {
                println!("  Handlers: {}", stats.handlers_registered.join(", "));
            }
        }
    }

    Ok(())
}
