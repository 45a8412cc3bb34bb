//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use teamchat::config::DEFAULT_BACKEND;

/// Teamchat - chat with a team of backend agents from the terminal
#[derive(Parser, Debug)]
#[command(name = "teamchat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Backend origin
    #[arg(long, env = "TEAMCHAT_BACKEND", default_value = DEFAULT_BACKEND, global = true)]
    pub backend: String,

    /// Directory for persisted sessions (defaults to the platform data dir)
    #[arg(long, env = "TEAMCHAT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List sessions
    Sessions {
        /// Show archived sessions instead of active ones
        #[arg(long)]
        archived: bool,
    },

    /// Start a new session and focus it
    New,

    /// Focus a session (id or unique prefix)
    Switch { id: String },

    /// Archive a session
    Archive { id: String },

    /// Delete a session permanently
    Delete { id: String },

    /// Send a message to the current session
    Send {
        /// Message this one replies to
        #[arg(long)]
        reply_to: Option<String>,

        /// Keep listening for agent replies for this many seconds
        #[arg(long, value_name = "SECONDS")]
        wait: Option<u64>,

        /// Message text
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },

    /// Resend a failed message
    Retry { message_id: String },

    /// Edit a message in the current session
    Edit {
        message_id: String,

        /// Replacement text
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },

    /// Delete a message in the current session (kept as a tombstone)
    Rm { message_id: String },

    /// Show the current session's messages
    History {
        /// Show every retained message instead of the latest page
        #[arg(long)]
        all: bool,
    },

    /// Show older messages of the current session
    More {
        /// Pages to load
        #[arg(long, default_value = "1")]
        pages: u32,
    },

    /// Stay connected and print agent messages as they arrive
    Listen,

    /// Check backend health
    Health,

    /// List the agent team
    Agents,

    /// Show the backup of an ingested message
    Restore { message_id: String },

    /// Show recently received realtime messages
    Backlog,
}
