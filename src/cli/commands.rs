//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: apply a property change and drive the build-fix loop
//! - set-property: edit the property file only
//! - classify: classify a saved build log

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// buildfixer - apply a build property change and fix the build until it is green
#[derive(Parser, Debug)]
#[command(name = "buildfixer")]
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
    /// Set a property, build, and let the advisor fix failures
    Run(RunArgs),

    /// Set a property in the checkout's property file
    SetProperty {
        /// Checkout directory
        #[arg(long)]
        checkout: PathBuf,

        /// Property key
        #[arg(short, long)]
        key: String,

        /// New value
        #[arg(long)]
        value: String,

        /// Property file relative to the checkout
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the failure signature and advisor excerpt of a saved build log
    Classify {
        /// Build log file
        #[arg(short, long)]
        log: PathBuf,

        /// Exit code the build ended with
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        exit_code: i32,

        /// Checkout root, to report paths relative to it
        #[arg(long)]
        checkout: Option<PathBuf>,
    },
}

/// Arguments of `buildfixer run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Existing checkout directory
    #[arg(long, required_unless_present = "repo", conflicts_with = "repo")]
    pub checkout: Option<PathBuf>,

    /// Repository URL to clone into a fresh checkout
    #[arg(long)]
    pub repo: Option<String>,

    /// Property key to change
    #[arg(short, long)]
    pub key: String,

    /// New property value
    #[arg(long)]
    pub value: String,

    /// Retry budget
    #[arg(short, long)]
    pub max_retries: Option<u32>,

    /// Build timeout in milliseconds
    #[arg(long)]
    pub build_timeout_ms: Option<u64>,

    /// Advisor timeout in milliseconds
    #[arg(long)]
    pub advisor_timeout_ms: Option<u64>,

    /// Shell command to build with instead of Gradle
    #[arg(long)]
    pub build_command: Option<String>,

    /// Write the run report as JSON to this file
    #[arg(short, long)]
    pub report: Option<PathBuf>,
}
