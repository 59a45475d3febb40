//! CLI module for buildfixer - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for a full build-fix run,
//! standalone property edits, and log classification.

pub mod commands;

pub use commands::Cli;
