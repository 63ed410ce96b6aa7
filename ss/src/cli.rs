//! CLI argument parsing for statestore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Layered session-state store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all stored sessions
    List,

    /// Display a session record
    Show {
        /// Session id
        #[arg(required = true)]
        session_id: String,
    },

    /// Delete a session record
    Delete {
        /// Session id
        #[arg(required = true)]
        session_id: String,
    },

    /// Remove session files older than the retention window
    Cleanup {
        /// Maximum age in days
        #[arg(short, long, default_value = "30")]
        days: u64,
    },
}
