use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::console::ModelAction;
use crate::provider::ProviderKind;

#[derive(Parser)]
#[command(name = "scrivd", about = "System-wide AI writing tools for the selected text")]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/scrivd/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Provider to use instead of the configured one
    #[arg(long, global = true)]
    pub provider: Option<ProviderKind>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the hotkey daemon
    Run {
        /// Hotkey chord, e.g. "Ctrl+Space"
        #[arg(long)]
        hotkey: Option<String>,

        /// Command each press runs (default: general.default_command)
        #[arg(long)]
        command: Option<String>,

        /// Described change for the Custom command
        #[arg(long)]
        instruction: Option<String>,
    },

    /// Run one command on the current selection and exit
    Once {
        #[arg(long)]
        command: String,

        /// Described change for the Custom command, or a question when
        /// nothing is selected
        #[arg(long)]
        instruction: Option<String>,
    },

    /// Chat with the provider in the terminal
    Chat {
        /// First message
        #[arg(long)]
        seed: Option<String>,
    },

    /// List available commands
    Commands,

    /// Manage the on-device model
    Model {
        #[command(subcommand)]
        action: ModelCommand,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ModelCommand {
    /// Show download state and file locations
    Status,
    /// Download the model if it is not installed
    Download,
    /// Delete the downloaded files
    Delete,
    /// Retry a failed download
    Retry,
}

impl From<ModelCommand> for ModelAction {
    fn from(c: ModelCommand) -> Self {
        match c {
            ModelCommand::Status => ModelAction::Status,
            ModelCommand::Download => ModelAction::Download,
            ModelCommand::Delete => ModelAction::Delete,
            ModelCommand::Retry => ModelAction::Retry,
        }
    }
}
