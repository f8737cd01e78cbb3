use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "scilab-kernel", about = "Scilab kernel for notebook front-ends", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Scilab console binary to run the engine with (overrides SCILAB_EXECUTABLE).
    #[arg(long, global = true, value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Where command history is persisted (overrides SCILAB_KERNEL_HIST_FILE).
    #[arg(long = "history-file", global = true, value_name = "PATH", conflicts_with = "no_history")]
    pub history_file: Option<PathBuf>,

    /// Keep history in memory only.
    #[arg(long = "no-history", global = true)]
    pub no_history: bool,

    /// Log filter, e.g. `debug` or `scilab_kernel=trace` (overrides SCILAB_KERNEL_LOG).
    #[arg(long = "log-level", global = true, value_name = "FILTER")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Answer newline-delimited JSON requests on stdin (default).
    Serve,
    /// Interactive line-by-line console.
    Console,
    /// Print kernel metadata as JSON and exit.
    Info,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}
