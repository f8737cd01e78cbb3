//! Request contents and reply envelopes of the kernel handler surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: &str = "5.3";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    #[allow(dead_code)]
    pub user_expressions: Map<String, Value>,
    #[serde(default)]
    #[allow(dead_code)]
    pub allow_stdin: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into(), store_history: true, ..Default::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

/// History query. Every field is accepted for shape compatibility; the
/// kernel always answers with the whole persisted history.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(dead_code)]
pub struct HistoryRequest {
    #[serde(default)]
    pub hist_access_type: String,
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub raw: bool,
    pub session: Option<i64>,
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub n: Option<i64>,
    pub pattern: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok {
        execution_count: u32,
        payload: Vec<Value>,
        user_expressions: Map<String, Value>,
    },
    Error {
        execution_count: u32,
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    Abort {
        execution_count: u32,
    },
}

impl ExecuteReply {
    pub fn ok(execution_count: u32) -> Self {
        ExecuteReply::Ok { execution_count, payload: Vec::new(), user_expressions: Map::new() }
    }

    pub fn error(execution_count: u32, evalue: impl Into<String>) -> Self {
        ExecuteReply::Error {
            execution_count,
            ename: String::new(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    pub fn abort(execution_count: u32) -> Self {
        ExecuteReply::Abort { execution_count }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExecuteReply::Ok { .. } => "ok",
            ExecuteReply::Error { .. } => "error",
            ExecuteReply::Abort { .. } => "abort",
        }
    }

    pub fn execution_count(&self) -> u32 {
        match self {
            ExecuteReply::Ok { execution_count, .. }
            | ExecuteReply::Error { execution_count, .. }
            | ExecuteReply::Abort { execution_count } => *execution_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteReply {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub metadata: Map<String, Value>,
    pub status: Status,
}

impl CompleteReply {
    pub fn new(matches: Vec<String>, cursor_start: usize, cursor_end: usize) -> Self {
        Self { matches, cursor_start, cursor_end, metadata: Map::new(), status: Status::Ok }
    }

    pub fn empty(cursor_pos: usize) -> Self {
        Self::new(Vec::new(), cursor_pos, cursor_pos)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectReply {
    pub status: Status,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl InspectReply {
    pub fn aborted() -> Self {
        Self { status: Status::Aborted, data: Map::new(), metadata: Map::new() }
    }
}

/// `(session, line_number, input)`; the first two are always `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry(pub Option<u32>, pub Option<u32>, pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReply {
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReply {
    pub status: Status,
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub mimetype: String,
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelInfoReply {
    pub status: Status,
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
}

/// Side-channel text emitted while a request is handled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stream {
    pub name: StreamName,
    pub text: String,
}

impl Stream {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { name: StreamName::Stdout, text: text.into() }
    }
}
