//! Engine session abstraction (start/eval/keep/put/help/close) and version check.

use std::{fmt, path::Path, sync::LazyLock};

use regex_lite::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[cfg(test)]
pub mod fake;
pub mod scilab;
pub mod signals;

pub use scilab::ScilabSession;

/// Marker Scilab's binding prefixes structured evaluation errors with.
pub const ERROR_ECHO_MARKER: &str = "Scilab returned:";

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version "(\d+(\.\d+)+)"#).expect("valid version regex"));

#[derive(Debug, Error)]
pub enum EngineError {
    /// Structured failure reported by the engine; the session stays usable.
    #[error("{0}")]
    Evaluation(String),
    #[error("evaluation interrupted")]
    Interrupted,
    /// Anything the session cannot account for. Forces a restart.
    #[error("engine fault: {0}")]
    Fault(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Fault(err.to_string())
    }
}

/// A value produced by an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Number(f64),
    Text(String),
}

impl EngineValue {
    /// Builds a value from captured console text.
    ///
    /// A display of the form `name = <number>` (or a bare number) becomes
    /// `Number`, everything else stays text.
    pub fn from_display(text: &str) -> Self {
        let trimmed = text.trim();
        let rhs = match trimmed.rsplit_once('=') {
            Some((lhs, rhs)) if is_identifier(lhs.trim()) => rhs.trim(),
            _ => trimmed,
        };
        let candidate = rhs.strip_suffix('.').unwrap_or(rhs);
        match candidate.parse::<f64>() {
            Ok(n) if !candidate.is_empty() => EngineValue::Number(n),
            _ => EngineValue::Text(trimmed.to_string()),
        }
    }

    /// Scilab literal assigning this value.
    pub fn to_literal(&self) -> String {
        match self {
            EngineValue::Number(n) if n.is_nan() => "%nan".to_string(),
            EngineValue::Number(n) if n.is_infinite() => {
                if *n > 0.0 { "%inf".to_string() } else { "-%inf".to_string() }
            }
            EngineValue::Number(n) => format!("{n:?}"),
            EngineValue::Text(s) => scilab_string(s),
        }
    }
}

impl fmt::Display for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineValue::Number(n) => write!(f, "{n}"),
            EngineValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EngineValue {
    fn from(s: &str) -> Self {
        EngineValue::Text(s.to_string())
    }
}

/// Double-quoted Scilab string literal. Quotes of both kinds are doubled and
/// line breaks are split into a concatenation with `ascii(10)`.
pub fn scilab_string(s: &str) -> String {
    let parts: Vec<String> = s
        .split('\n')
        .map(|line| {
            let escaped = line.trim_end_matches('\r').replace('"', "\"\"").replace('\'', "''");
            format!("\"{escaped}\"")
        })
        .collect();
    parts.join(" + ascii(10) + ")
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '%' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A live connection to the numerical engine.
///
/// The kernel is the sole owner of its session and calls it from a single
/// task, so implementations need not be `Sync`.
#[allow(async_fn_in_trait)]
pub trait EngineSession {
    async fn start(&mut self) -> Result<(), EngineError>;

    async fn restart(&mut self) -> Result<(), EngineError> {
        self.close().await?;
        self.start().await
    }

    /// Runs `code`; `None` when the evaluation produced no output.
    async fn evaluate(&mut self, code: &str) -> Result<Option<EngineValue>, EngineError>;

    /// Copies the result of the last `evaluate` into `name` inside the
    /// engine, with its native type. `false` when that evaluation left no
    /// result behind.
    async fn keep_result(&mut self, name: &str) -> Result<bool, EngineError>;

    async fn put(&mut self, name: &str, value: &EngineValue) -> Result<(), EngineError>;

    async fn exists(&mut self, name: &str) -> Result<bool, EngineError>;

    async fn help(&mut self, name: &str) -> Result<(), EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;

    /// Forwards an interrupt to the engine process and resynchronises.
    async fn interrupt(&mut self) -> Result<(), EngineError>;

    fn is_running(&self) -> bool;
}

/// Runs `<program> -version` and returns whatever it printed.
///
/// A non-zero exit still yields the captured output; a spawn failure yields
/// an empty banner.
pub async fn read_banner(program: &Path) -> String {
    match Command::new(program).arg("-version").output().await {
        Ok(out) => {
            if !out.status.success() {
                warn!(program = %program.display(), status = %out.status, "version query exited with failure");
            }
            let banner = String::from_utf8_lossy(&out.stdout).into_owned();
            info!(banner = %banner.trim(), "engine banner");
            banner
        }
        Err(err) => {
            warn!(program = %program.display(), %err, "cannot run version query");
            String::new()
        }
    }
}

/// Extracts the `X.Y.Z` out of a `version "X.Y.Z"` token.
pub fn parse_language_version(banner: &str) -> Option<String> {
    VERSION_PATTERN.captures(banner).map(|caps| caps[1].to_string())
}
