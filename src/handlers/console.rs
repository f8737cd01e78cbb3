//! Line-oriented interactive front-end.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::EngineSession;
use crate::kernel::messages::{ExecuteReply, ExecuteRequest, Stream};
use crate::kernel::{Kernel, SessionState, RESTART_NOTICE};
use crate::printer::{TextPrinter, Tone};

const PROMPT: &str = "--> ";

/// Reads one cell per line until `exit` or end of input.
///
/// `interactive` controls the prompt; piped input runs silently.
pub async fn run<S, R>(
    mut kernel: Kernel<S>,
    mut streams: mpsc::UnboundedReceiver<Stream>,
    input: R,
    printer: &TextPrinter,
    interactive: bool,
) -> Result<Kernel<S>>
where
    S: EngineSession,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    // Seed the cache from disk so shutdown appends to earlier sessions
    let previous = kernel.history_reply().history.len();
    info!(interactive, previous, "console ready");
    loop {
        if interactive {
            printer.prompt(PROMPT);
        }
        let Some(line) = lines.next_line().await? else {
            debug!("end of input");
            if kernel.state() != SessionState::Closed {
                kernel.shutdown(false).await;
            }
            if interactive {
                println!();
            }
            break;
        };

        let reply = kernel.execute(&ExecuteRequest::new(line)).await;
        debug!(status = reply.status(), count = reply.execution_count(), "cell done");
        let tone = match reply {
            ExecuteReply::Error { .. } => Tone::Error,
            _ => Tone::Plain,
        };
        while let Ok(stream) = streams.try_recv() {
            let tone = if stream.text == RESTART_NOTICE { Tone::Notice } else { tone };
            printer.print(&stream.text, tone);
        }

        if kernel.state() == SessionState::Closed {
            break;
        }
    }
    info!(executed = kernel.execution_count(), "console closed");
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeSession;
    use crate::history::CommandHistory;
    use std::io::Cursor;
    use std::path::PathBuf;

    async fn kernel(history: CommandHistory) -> (Kernel<FakeSession>, mpsc::UnboundedReceiver<Stream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let kernel = Kernel::start(FakeSession::default(), history, PathBuf::from("/nonexistent/scilab"), tx)
            .await
            .unwrap();
        (kernel, rx)
    }

    #[tokio::test]
    async fn exit_stops_reading_and_persists_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scilab_kernel.hist");
        let (kernel, streams) = kernel(CommandHistory::new(Some(path.clone()), 100)).await;
        let printer = TextPrinter { color: false };
        let input = Cursor::new(b"x = 1\nexit\ny = 2\n".to_vec());

        let kernel = run(kernel, streams, input, &printer, false).await.unwrap();

        assert_eq!(kernel.state(), SessionState::Closed);
        assert_eq!(kernel.session().evaluated, vec!["x = 1".to_string()]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x = 1\nexit");
    }

    #[tokio::test]
    async fn end_of_input_shuts_down() {
        let (kernel, streams) = kernel(CommandHistory::new(None, 10)).await;
        let printer = TextPrinter { color: false };
        let input = Cursor::new(b"bad\n\nx = 3\n".to_vec());

        let kernel = run(kernel, streams, input, &printer, false).await.unwrap();

        assert_eq!(kernel.state(), SessionState::Closed);
        assert_eq!(kernel.execution_count(), 2);
        assert_eq!(kernel.session().closes, 1);
    }
}
