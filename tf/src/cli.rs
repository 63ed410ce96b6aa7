//! CLI argument parsing for taskfabric

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::dlq::DlqItemStatus;

#[derive(Parser, Debug)]
#[command(name = "tf")]
#[command(author, version, about = "Dead-letter queue operator tool", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List dead-letter items
    List {
        /// Only items with this status (pending, retrying, failed, ...)
        #[arg(short, long)]
        status: Option<DlqItemStatus>,

        /// Only items of this operation type
        #[arg(short, long)]
        operation_type: Option<String>,
    },

    /// Display one item, including its processing history
    Show {
        /// Item id
        #[arg(required = true)]
        id: String,
    },

    /// Reset an item's retry budget so the daemon's next sweep picks it up
    Requeue {
        /// Item id
        #[arg(required = true)]
        id: String,
    },

    /// Discard an item permanently
    Discard {
        /// Item id
        #[arg(required = true)]
        id: String,

        /// Why the item is being dropped
        #[arg(short, long, default_value = "discarded by operator")]
        reason: String,
    },

    /// Purge old successful/discarded items
    Cleanup {
        /// Maximum age in days
        #[arg(short, long)]
        days: Option<u64>,
    },

    /// Show queue statistics
    Stats,
}
