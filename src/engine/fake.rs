//! Scripted engine session for kernel and front-end tests.

use std::collections::HashSet;

use super::{EngineError, EngineSession, EngineValue};
use crate::kernel::INTERRUPTED_MARKER;

/// Scripted stand-in for a Scilab session.
#[derive(Default)]
pub struct FakeSession {
    pub running: bool,
    pub starts: usize,
    pub closes: usize,
    pub interrupts: usize,
    pub evaluated: Vec<String>,
    pub puts: Vec<(String, EngineValue)>,
    pub kept: Vec<String>,
    has_result: bool,
    pub helps: Vec<String>,
    pub known: HashSet<String>,
}

impl FakeSession {
    pub fn with_names(names: &[&str]) -> Self {
        Self { known: names.iter().map(|n| n.to_string()).collect(), ..Default::default() }
    }
}

impl EngineSession for FakeSession {
    async fn start(&mut self) -> Result<(), EngineError> {
        self.running = true;
        self.starts += 1;
        Ok(())
    }

    async fn evaluate(&mut self, code: &str) -> Result<Option<EngineValue>, EngineError> {
        self.evaluated.push(code.to_string());
        self.has_result = false;
        if !self.running {
            return Err(EngineError::Fault("not running".into()));
        }
        let result = match code {
            "loop" => std::future::pending().await,
            "boom" => Err(EngineError::Fault("pipe closed".into())),
            "bad" => Err(EngineError::Evaluation(
                "Scilab error while evaluating code\nScilab returned: Foo bar".into(),
            )),
            "clear" => Ok(None),
            "marker" => Ok(Some(EngineValue::Text(INTERRUPTED_MARKER.into()))),
            c if c.contains("completion(") => Ok(Some(EngineValue::Text("disp!display!".into()))),
            c => match c.rsplit_once('=') {
                Some((_, rhs)) => Ok(Some(EngineValue::from_display(rhs))),
                None => Ok(Some(EngineValue::Text(c.to_string()))),
            },
        };
        self.has_result = matches!(result, Ok(Some(_)));
        result
    }

    async fn keep_result(&mut self, name: &str) -> Result<bool, EngineError> {
        if !std::mem::take(&mut self.has_result) {
            return Ok(false);
        }
        self.kept.push(name.to_string());
        Ok(true)
    }

    async fn put(&mut self, name: &str, value: &EngineValue) -> Result<(), EngineError> {
        self.puts.push((name.to_string(), value.clone()));
        Ok(())
    }

    async fn exists(&mut self, name: &str) -> Result<bool, EngineError> {
        Ok(self.known.contains(name))
    }

    async fn help(&mut self, name: &str) -> Result<(), EngineError> {
        self.helps.push(name.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if self.running {
            self.closes += 1;
        }
        self.running = false;
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), EngineError> {
        self.interrupts += 1;
        self.has_result = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
