//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::expense::ExpensePatch;
use crate::notification::NotificationCategory;

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Ask command arguments.
#[derive(Debug, Args)]
pub struct AskCommand {
    /// What to ask the assistant
    pub message: String,
}

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// JSON-lines file of position samples
    pub file: PathBuf,

    /// Delay between samples in milliseconds
    #[arg(short, long, default_value = "0")]
    pub interval_ms: u64,

    /// Select this waypoint before replaying
    #[arg(short, long, value_name = "ID")]
    pub waypoint: Option<String>,

    /// Output the final state as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Next-waypoint commands.
#[derive(Debug, Subcommand)]
pub enum WaypointCommand {
    /// List the trip's waypoints
    List,

    /// Select the next waypoint on every device
    Set {
        /// Waypoint id
        id: String,
    },
}

/// Notification commands.
#[derive(Debug, Subcommand)]
pub enum NotifyCommand {
    /// Show a notification on every device
    Send {
        /// Message text
        message: String,

        /// Notification category
        #[arg(short = 't', long, value_enum, default_value = "info")]
        category: CategoryArg,
    },

    /// Dismiss the active notification
    Clear,
}

/// Expense ledger commands.
#[derive(Debug, Subcommand)]
pub enum ExpenseCommand {
    /// Record an expense
    Add {
        /// What was paid for
        title: String,

        /// Amount in whole currency units
        amount: i64,

        /// Who paid (defaults to this device's user)
        #[arg(short, long)]
        payer: Option<String>,
    },

    /// Change an expense
    Update {
        /// Expense id
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New amount
        #[arg(long)]
        amount: Option<i64>,

        /// New payer
        #[arg(long)]
        payer: Option<String>,
    },

    /// Delete an expense
    Remove {
        /// Expense id
        id: String,
    },

    /// Show the ledger, newest first
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

impl ExpenseCommand {
    /// The partial update described by an `update` command.
    #[must_use]
    pub fn patch(&self) -> Option<ExpensePatch> {
        match self {
            Self::Update {
                title,
                amount,
                payer,
                ..
            } => Some(ExpensePatch {
                title: title.clone(),
                amount: *amount,
                payer: payer.clone(),
            }),
            _ => None,
        }
    }
}

/// Reset command arguments.
#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Geofence listing arguments.
#[derive(Debug, Args)]
pub struct FencesCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Notification category argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    /// Ask for a rest stop
    RestRequest,
    /// Music related
    Music,
    /// General information
    Info,
    /// Something needs attention
    Warning,
}

impl From<CategoryArg> for NotificationCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::RestRequest => Self::RestRequest,
            CategoryArg::Music => Self::Music,
            CategoryArg::Info => Self::Info,
            CategoryArg::Warning => Self::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_arg_conversion() {
        assert_eq!(
            NotificationCategory::from(CategoryArg::RestRequest),
            NotificationCategory::RestRequest
        );
        assert_eq!(
            NotificationCategory::from(CategoryArg::Music),
            NotificationCategory::Music
        );
        assert_eq!(
            NotificationCategory::from(CategoryArg::Info),
            NotificationCategory::Info
        );
        assert_eq!(
            NotificationCategory::from(CategoryArg::Warning),
            NotificationCategory::Warning
        );
    }

    #[test]
    fn test_update_patch() {
        let cmd = ExpenseCommand::Update {
            id: "e1".to_string(),
            title: None,
            amount: Some(4200),
            payer: Some("Yuki".to_string()),
        };
        let patch = cmd.patch().unwrap();
        assert_eq!(patch.amount, Some(4200));
        assert_eq!(patch.payer.as_deref(), Some("Yuki"));
        assert!(patch.title.is_none());
    }

    #[test]
    fn test_patch_only_for_update() {
        let cmd = ExpenseCommand::Remove {
            id: "e1".to_string(),
        };
        assert!(cmd.patch().is_none());
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
