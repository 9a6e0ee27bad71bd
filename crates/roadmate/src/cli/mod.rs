//! Command-line interface for roadmate.
//!
//! This module provides the CLI structure for the `roadmate` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AskCommand, CategoryArg, ConfigCommand, ExpenseCommand, FencesCommand, NotifyCommand, ReplayCommand,
    ResetCommand, StatusCommand, WaypointCommand,
};

/// roadmate - Shared trip state for driver and passenger consoles
///
/// Keeps the next waypoint, the active notification, and the expense ledger
/// in step across every device on the trip, and derives distance, ETA, and
/// geofence announcements from position samples.
#[derive(Debug, Parser)]
#[command(name = "roadmate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the shared trip state
    Status(StatusCommand),

    /// Feed recorded position samples through a session
    Replay(ReplayCommand),

    /// List or select waypoints
    #[command(subcommand)]
    Waypoint(WaypointCommand),

    /// Send or clear the shared notification
    #[command(subcommand)]
    Notify(NotifyCommand),

    /// Manage the shared expense ledger
    #[command(subcommand)]
    Expense(ExpenseCommand),

    /// Clear the expense ledger
    Reset(ResetCommand),

    /// Print the chat request sent to the assistant proxy
    Ask(AskCommand),

    /// List geofences
    Fences(FencesCommand),

    /// Follow remote changes until interrupted
    Watch,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
