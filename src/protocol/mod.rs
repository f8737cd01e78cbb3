//! Newline-delimited JSON framing for the message bus.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INTERRUPT_REQUEST: &str = "interrupt_request";

/// One incoming request line.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub msg_id: Option<String>,
    pub msg_type: String,
    #[serde(default)]
    pub content: Value,
    /// When the line was read off the bus.
    #[serde(skip, default = "Instant::now")]
    pub received: Instant,
}

impl Envelope {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// `execute_request` -> `execute_reply`
    pub fn reply_type(&self) -> String {
        match self.msg_type.strip_suffix("_request") {
            Some(kind) => format!("{kind}_reply"),
            None => format!("{}_reply", self.msg_type),
        }
    }
}

/// One outgoing line: a reply, a stream chunk or an error.
#[derive(Debug, Clone, Serialize)]
pub struct Outgoing<'a, T: Serialize> {
    pub parent_id: Option<&'a str>,
    pub msg_type: &'a str,
    pub content: T,
}

impl<'a, T: Serialize> Outgoing<'a, T> {
    pub fn new(parent_id: Option<&'a str>, msg_type: &'a str, content: T) -> Self {
        Self { parent_id, msg_type, content }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            serde_json::json!({
                "parent_id": self.parent_id,
                "msg_type": "error",
                "content": { "message": format!("cannot encode {}: {err}", self.msg_type) },
            })
            .to_string()
        })
    }
}
