//! CLI module for chatloop - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands to run the server, run a
//! single turn locally, and inspect provider selection.

pub mod commands;

pub use commands::Cli;
