//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: run the HTTP server
//! - ask: run one conversation turn and print the event stream
//! - providers: show which provider a caller would get

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chatloop - streaming multi-provider tool-calling chat engine
#[derive(Parser, Debug)]
#[command(name = "chatloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind, overriding the config
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run one conversation turn and print the event stream
    Ask {
        /// User message
        message: String,

        /// Requested model identifier (default, opus, sonnet, claude-...)
        #[arg(short, long, default_value = "default")]
        model: String,

        /// Offer tools to the model
        #[arg(long)]
        tools: bool,

        /// Bearer token identifying the caller
        #[arg(long)]
        token: Option<String>,

        /// Design context appended to the system prompt
        #[arg(long)]
        theme_context: Option<String>,
    },

    /// Show provider availability and selection for a caller
    Providers {
        /// Bearer token identifying the caller
        #[arg(long)]
        token: Option<String>,

        /// Requested model identifier
        #[arg(short, long, default_value = "default")]
        model: String,
    },
}
