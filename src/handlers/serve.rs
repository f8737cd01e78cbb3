//! JSON-lines front-end: one request per stdin line, replies on stdout.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::EngineSession;
use crate::kernel::messages::{
    CompleteRequest, ExecuteRequest, HistoryRequest, InspectRequest, ShutdownRequest, Stream,
};
use crate::kernel::{InterruptHandle, Kernel, SessionState};
use crate::protocol::{Envelope, Outgoing, INTERRUPT_REQUEST};

/// Runs the request loop until shutdown or end of input.
///
/// Returns the output sink once every line has been flushed to it.
pub async fn serve<S, R, W>(
    mut kernel: Kernel<S>,
    mut streams: mpsc::UnboundedReceiver<Stream>,
    input: R,
    output: W,
) -> Result<W>
where
    S: EngineSession,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(out_rx, output));

    let (req_tx, mut requests) = mpsc::unbounded_channel::<Envelope>();
    let reader = tokio::spawn(read_requests(input, kernel.interrupt_handle(), req_tx, out_tx.clone()));

    info!("serving requests on stdin");
    loop {
        let Some(env) = requests.recv().await else {
            debug!("input closed");
            if kernel.state() != SessionState::Closed {
                kernel.shutdown(false).await;
            }
            break;
        };
        let (lines, keep_going) = dispatch(&mut kernel, &mut streams, &env).await;
        for line in lines {
            if out_tx.send(line).is_err() {
                warn!("output closed");
                break;
            }
        }
        if !keep_going {
            break;
        }
    }

    reader.abort();
    drop(out_tx);
    Ok(writer.await??)
}

/// Handles one request and renders the outgoing lines, streams first.
///
/// The flag is `false` once the loop should stop.
pub async fn dispatch<S: EngineSession>(
    kernel: &mut Kernel<S>,
    streams: &mut mpsc::UnboundedReceiver<Stream>,
    env: &Envelope,
) -> (Vec<String>, bool) {
    let parent = env.msg_id.as_deref();
    let reply_type = env.reply_type();
    let mut keep_going = true;

    let content = match env.msg_type.as_str() {
        "execute_request" => match parse::<ExecuteRequest>(env) {
            Ok(req) => to_value(kernel.execute_at(&req, env.received).await),
            Err(err) => return (vec![error_line(parent, err)], true),
        },
        "complete_request" => match parse::<CompleteRequest>(env) {
            Ok(req) => to_value(kernel.complete(&req.code, req.cursor_pos).await),
            Err(err) => return (vec![error_line(parent, err)], true),
        },
        "inspect_request" => match parse::<InspectRequest>(env) {
            Ok(req) => to_value(kernel.inspect(&req.code, req.cursor_pos, req.detail_level)),
            Err(err) => return (vec![error_line(parent, err)], true),
        },
        "history_request" => match parse::<HistoryRequest>(env) {
            Ok(_) => to_value(kernel.history_reply()),
            Err(err) => return (vec![error_line(parent, err)], true),
        },
        "shutdown_request" => match parse::<ShutdownRequest>(env) {
            Ok(req) => {
                keep_going = req.restart;
                to_value(kernel.shutdown(req.restart).await)
            }
            Err(err) => return (vec![error_line(parent, err)], true),
        },
        "kernel_info_request" => to_value(kernel.kernel_info().await),
        other => {
            warn!(msg_type = other, "unsupported request");
            return (vec![error_line(parent, format!("unsupported msg_type: {other}"))], true);
        }
    };

    let mut lines = Vec::new();
    while let Ok(stream) = streams.try_recv() {
        lines.push(Outgoing::new(parent, "stream", stream).to_line());
    }
    lines.push(Outgoing::new(parent, &reply_type, content).to_line());
    (lines, keep_going)
}

async fn read_requests<R>(
    input: R,
    interrupts: InterruptHandle,
    requests: mpsc::UnboundedSender<Envelope>,
    out: mpsc::UnboundedSender<String>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "cannot read request");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let env = match Envelope::parse(&line) {
            Ok(env) => env,
            Err(err) => {
                warn!(%err, "malformed request line");
                let _ = out.send(error_line(None, format!("malformed request: {err}")));
                continue;
            }
        };
        if env.msg_type == INTERRUPT_REQUEST {
            let delivered = interrupts.interrupt();
            debug!(delivered, "interrupt requested");
            let reply = Outgoing::new(env.msg_id.as_deref(), "interrupt_reply", json!({"status": "ok"}));
            let _ = out.send(reply.to_line());
            continue;
        }
        if requests.send(env).is_err() {
            break;
        }
    }
}

async fn write_lines<W>(mut lines: mpsc::UnboundedReceiver<String>, mut output: W) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(output)
}

/// Missing content deserializes as an empty object.
fn parse<T: DeserializeOwned>(env: &Envelope) -> serde_json::Result<T> {
    match &env.content {
        Value::Null => serde_json::from_value(Value::Object(Map::new())),
        content => serde_json::from_value(content.clone()),
    }
}

fn to_value<T: Serialize>(reply: T) -> Value {
    serde_json::to_value(reply).unwrap_or_else(|err| json!({"status": "error", "evalue": err.to_string()}))
}

fn error_line(parent: Option<&str>, message: impl ToString) -> String {
    Outgoing::new(parent, "error", json!({"message": message.to_string()})).to_line()
}
