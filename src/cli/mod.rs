//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CheckCommand, OptionsCommand, RunCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// fMRI preprocessing adapter around the SPM12 standalone
#[derive(Debug, Parser, Clone)]
#[command(name = "run-fmri")]
#[command(version)]
#[command(
    about = "Preprocess BIDS, NIfTI or DICOM fMRI data with SPM12",
    long_about = "Reads a computation request as JSON (stdin or argument), runs the SPM12 \
                  preprocessing pipeline and prints the computation response as JSON on stdout."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the adapter configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the pipeline on a computation request (default)
    Run(RunCommand),

    /// Check that the toolkit starts and reports the expected version
    Check(CheckCommand),

    /// Print the resolved pipeline options
    Options(OptionsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// The command to run; `run` when none was given
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Run(RunCommand::default()))
    }
}
