//! Session adapter: notebook requests in, engine calls out.

use std::{path::PathBuf, time::Instant};

use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info, warn};

use crate::{
    engine::{parse_language_version, read_banner, EngineError, EngineSession, EngineValue},
    history::CommandHistory,
};

pub mod complete;
pub mod input;
pub mod messages;

use input::{categorize_error, help_topic, last_token, substitute_last_value, Directive, LAST_VALUE_VAR};
use messages::{
    CompleteReply, ExecuteReply, ExecuteRequest, HistoryEntry, HistoryReply, InspectReply,
    KernelInfoReply, LanguageInfo, ShutdownReply, Status, Stream, PROTOCOL_VERSION,
};

pub const IMPLEMENTATION: &str = "scilab_kernel";
pub const LANGUAGE: &str = "scilab";

/// Literal output the engine produces for an interrupted session.
///
/// A genuine result equal to this text is indistinguishable from an
/// interrupt and is reported as one.
pub const INTERRUPTED_MARKER: &str = "Scilab Session Interrupted";
pub const RESTART_NOTICE: &str = "Uncaught Exception, Restarting Scilab";
pub const CLOSED_MESSAGE: &str = "Scilab Session Closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Closed,
}

/// Cloneable handle that cuts an outstanding evaluation short.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: mpsc::UnboundedSender<Instant>,
}

impl InterruptHandle {
    pub fn interrupt(&self) -> bool {
        self.tx.send(Instant::now()).is_ok()
    }
}

pub struct Kernel<S> {
    session: S,
    state: SessionState,
    history: CommandHistory,
    execution_count: u32,
    last_value: EngineValue,
    iopub: mpsc::UnboundedSender<Stream>,
    interrupt_tx: mpsc::UnboundedSender<Instant>,
    interrupts: mpsc::UnboundedReceiver<Instant>,
    version_program: PathBuf,
    banner: OnceCell<String>,
}

impl<S: EngineSession> Kernel<S> {
    /// Starts the session and seeds the last-value placeholder.
    pub async fn start(
        mut session: S,
        history: CommandHistory,
        version_program: PathBuf,
        iopub: mpsc::UnboundedSender<Stream>,
    ) -> Result<Self, EngineError> {
        session.start().await?;
        let last_value = EngineValue::Text(String::new());
        session.put(LAST_VALUE_VAR, &last_value).await?;
        match history.path() {
            Some(path) => debug!(path = %path.display(), cap = history.cap(), "history file"),
            None => info!("history persistence disabled"),
        }

        let (interrupt_tx, interrupts) = mpsc::unbounded_channel();
        Ok(Self {
            session,
            state: SessionState::Running,
            history,
            execution_count: 0,
            last_value,
            iopub,
            interrupt_tx,
            interrupts,
            version_program,
            banner: OnceCell::new(),
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { tx: self.interrupt_tx.clone() }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &CommandHistory {
        &self.history
    }

    fn stream(&self, text: impl Into<String>) {
        if self.iopub.send(Stream::stdout(text)).is_err() {
            debug!("stream receiver dropped");
        }
    }

    pub async fn execute(&mut self, request: &ExecuteRequest) -> ExecuteReply {
        self.execute_at(request, Instant::now()).await
    }

    /// Runs a request received at `received`. Interrupts sent after that
    /// instant apply to it even when they arrive before evaluation starts.
    pub async fn execute_at(&mut self, request: &ExecuteRequest, received: Instant) -> ExecuteReply {
        let code = request.code.trim();
        if !code.is_empty() && request.store_history {
            self.history.push(code);
            if !request.silent {
                self.execution_count += 1;
            }
        }

        match Directive::classify(code) {
            Directive::Noop => ExecuteReply::ok(self.execution_count),
            Directive::Exit => {
                self.shutdown(false).await;
                ExecuteReply::abort(self.execution_count)
            }
            Directive::Restart => {
                self.restart_session().await;
                ExecuteReply::abort(self.execution_count)
            }
            Directive::Help(query) => {
                self.help(query).await;
                ExecuteReply::abort(self.execution_count)
            }
            Directive::Evaluate(code) => {
                if self.state == SessionState::Closed {
                    self.stream(CLOSED_MESSAGE);
                    return ExecuteReply::error(self.execution_count, CLOSED_MESSAGE);
                }
                let code = substitute_last_value(code);
                self.evaluate(&code, request.silent, received).await
            }
        }
    }

    async fn evaluate(&mut self, code: &str, silent: bool, received: Instant) -> ExecuteReply {
        // Interrupts sent before the request arrived do not apply to it
        let mut pending = false;
        while let Ok(sent) = self.interrupts.try_recv() {
            pending |= sent >= received;
        }
        if pending {
            info!("interrupted before evaluation");
            return ExecuteReply::abort(self.execution_count);
        }

        debug!(%code, "evaluating");
        let result = tokio::select! {
            result = self.session.evaluate(code) => result,
            Some(_) = self.interrupts.recv() => Err(EngineError::Interrupted),
        };

        match result {
            Ok(value) => {
                let output = self.handle_output(value, silent).await;
                if output == INTERRUPTED_MARKER {
                    ExecuteReply::abort(self.execution_count)
                } else {
                    ExecuteReply::ok(self.execution_count)
                }
            }
            Err(EngineError::Interrupted) => {
                info!("evaluation interrupted");
                if let Err(err) = self.session.interrupt().await {
                    warn!(%err, "engine did not recover from interrupt, restarting");
                    self.restart_session().await;
                }
                ExecuteReply::abort(self.execution_count)
            }
            Err(EngineError::Evaluation(raw)) => self.handle_error(&raw),
            Err(err) => {
                error!(%err, "uncaught engine fault");
                self.restart_session().await;
                self.stream(RESTART_NOTICE);
                ExecuteReply::ok(self.execution_count)
            }
        }
    }

    /// Streams the textual form of a result and keeps the result itself,
    /// with its engine type, as the last value.
    async fn handle_output(&mut self, value: Option<EngineValue>, silent: bool) -> String {
        let Some(value) = value else {
            return String::new();
        };
        match self.session.keep_result(LAST_VALUE_VAR).await {
            Ok(true) => self.last_value = value.clone(),
            Ok(false) => debug!("no result to keep"),
            Err(err) => warn!(%err, "cannot update {LAST_VALUE_VAR}"),
        }
        let text = value.to_string();
        if !silent {
            self.stream(text.clone());
        }
        text
    }

    fn handle_error(&self, raw: &str) -> ExecuteReply {
        let message = categorize_error(raw);
        self.stream(message.clone());
        ExecuteReply::error(self.execution_count, message)
    }

    async fn help(&mut self, query: &str) {
        let Some(topic) = help_topic(query) else {
            return;
        };
        if self.state == SessionState::Closed {
            debug!(%topic, "help requested on closed session");
            return;
        }
        match self.session.exists(&topic).await {
            Ok(true) => {
                if let Err(err) = self.session.help(&topic).await {
                    warn!(%topic, %err, "help lookup failed");
                    return;
                }
                self.stream(format!("Calling Help Browser for `{topic}`"));
            }
            Ok(false) => debug!(%topic, "no help topic"),
            Err(err) => warn!(%topic, %err, "help lookup failed"),
        }
    }

    pub async fn complete(&mut self, code: &str, cursor_pos: usize) -> CompleteReply {
        let before = complete::prefix_at(code, cursor_pos);
        let cursor_pos = before.chars().count();
        if before.is_empty() || before.ends_with(' ') {
            return CompleteReply::empty(cursor_pos);
        }
        let Some(token) = last_token(before) else {
            return CompleteReply::empty(cursor_pos);
        };

        if token.contains(std::path::MAIN_SEPARATOR) {
            return match complete::path_matches(token) {
                Some((matches, replaced)) => {
                    CompleteReply::new(matches, cursor_pos - replaced, cursor_pos)
                }
                None => CompleteReply::empty(cursor_pos),
            };
        }

        let mut matches = Vec::new();
        if self.state == SessionState::Running {
            match self.session.evaluate(&complete::engine_query(token)).await {
                Ok(Some(raw)) => matches = complete::split_candidates(&raw.to_string()),
                Ok(None) => {}
                Err(err) => debug!(%token, %err, "engine completion failed"),
            }
        }
        complete::extend_with_builtins(&mut matches, token);

        CompleteReply::new(matches, cursor_pos - token.chars().count(), cursor_pos)
    }

    /// Placeholder; no inspection is performed.
    pub fn inspect(&self, _code: &str, _cursor_pos: usize, _detail_level: u8) -> InspectReply {
        InspectReply::aborted()
    }

    pub fn history_reply(&mut self) -> HistoryReply {
        let lines = match self.history.load() {
            Ok(lines) => lines,
            Err(err) => {
                warn!(%err, "history unavailable");
                Vec::new()
            }
        };
        debug!(entries = lines.len(), "**HISTORY");
        HistoryReply { history: lines.into_iter().map(|l| HistoryEntry(None, None, l)).collect() }
    }

    pub async fn shutdown(&mut self, restart: bool) -> ShutdownReply {
        debug!(restart, entries = self.history.len(), "**Shutting down");
        if restart {
            self.restart_session().await;
        } else {
            self.close_session().await;
        }
        if let Err(err) = self.history.persist() {
            warn!(%err, "cannot persist history");
        }
        ShutdownReply { status: Status::Ok, restart }
    }

    pub async fn kernel_info(&self) -> KernelInfoReply {
        let banner = self
            .banner
            .get_or_init(|| read_banner(&self.version_program))
            .await;
        info_reply(banner.clone())
    }

    /// Restarts in place. History and the last value survive; the fresh
    /// session gets back the last value as far as its display allows.
    async fn restart_session(&mut self) {
        info!("restarting Scilab session");
        match self.session.restart().await {
            Ok(()) => {
                self.state = SessionState::Running;
                if let Err(err) = self.session.put(LAST_VALUE_VAR, &self.last_value).await {
                    warn!(%err, "cannot restore {LAST_VALUE_VAR}");
                }
            }
            Err(err) => {
                error!(%err, "restart failed");
                if !self.session.is_running() {
                    self.state = SessionState::Closed;
                }
            }
        }
    }

    async fn close_session(&mut self) {
        if let Err(err) = self.session.close().await {
            warn!(%err, "closing session failed");
        }
        self.state = SessionState::Closed;
    }
}

/// Kernel metadata built around the engine banner.
pub fn info_reply(banner: String) -> KernelInfoReply {
    KernelInfoReply {
        status: Status::Ok,
        protocol_version: PROTOCOL_VERSION.to_string(),
        implementation: IMPLEMENTATION.to_string(),
        implementation_version: env!("CARGO_PKG_VERSION").to_string(),
        language_info: LanguageInfo {
            name: LANGUAGE.to_string(),
            version: parse_language_version(&banner),
            mimetype: "text/x-scilab".to_string(),
            file_extension: ".sci".to_string(),
        },
        banner,
    }
}
