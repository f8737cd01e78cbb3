mod cli;
mod config;
mod engine;
mod handlers;
mod history;
mod kernel;
mod printer;
mod protocol;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Config;
use engine::{read_banner, ScilabSession};
use history::CommandHistory;
use kernel::Kernel;
use printer::TextPrinter;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut cfg = Config::load();
    if let Some(exe) = &args.executable {
        cfg.set("SCILAB_EXECUTABLE", exe.to_string_lossy());
    }
    if let Some(path) = &args.history_file {
        cfg.set("SCILAB_KERNEL_HIST_FILE", path.to_string_lossy());
    }
    init_logging(args.log_level.clone().or_else(|| cfg.log_level()));
    debug!(path = %cfg.config_path.display(), "configuration loaded");

    if args.command() == Command::Info {
        let reply = kernel::info_reply(read_banner(&cfg.version_executable()).await);
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let history_path = if args.no_history { None } else { cfg.history_file() };
    let history = CommandHistory::new(history_path, cfg.history_length());
    let session = ScilabSession::new(
        cfg.executable(),
        cfg.engine_args(),
        Duration::from_secs(cfg.startup_timeout_secs()),
    );

    let (iopub, streams) = mpsc::unbounded_channel();
    let kernel = Kernel::start(session, history, cfg.version_executable(), iopub)
        .await
        .with_context(|| format!("starting Scilab from {}", cfg.executable().display()))?;
    handlers::forward_ctrl_c(kernel.interrupt_handle());

    match args.command() {
        Command::Console => {
            let printer = TextPrinter::for_stdout();
            let interactive = io::stdin().is_terminal();
            let input = BufReader::new(tokio::io::stdin());
            handlers::console::run(kernel, streams, input, &printer, interactive).await?;
        }
        _ => {
            let input = BufReader::new(tokio::io::stdin());
            handlers::serve::serve(kernel, streams, input, tokio::io::stdout()).await?;
        }
    }

    info!("kernel stopped");
    // A blocking stdin read would otherwise hold the runtime open
    std::process::exit(0);
}

/// Logs go to stderr; stdout belongs to the message bus.
fn init_logging(explicit: Option<String>) {
    let filter = explicit
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}
