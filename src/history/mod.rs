//! Bounded command history persisted as newline-joined text.

use std::{collections::VecDeque, fs, path::PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandHistory {
    cap: usize,
    storage_path: Option<PathBuf>,
    entries: VecDeque<String>,
}

impl CommandHistory {
    pub fn new(storage_path: Option<PathBuf>, cap: usize) -> Self {
        Self { cap, storage_path, entries: VecDeque::with_capacity(cap.min(1024)) }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.storage_path.as_ref()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Appends an entry, dropping the oldest ones beyond the cap.
    pub fn push(&mut self, code: impl Into<String>) {
        if self.cap == 0 {
            return;
        }
        self.entries.push_back(code.into());
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    /// Replaces the in-memory cache with the persisted lines.
    ///
    /// Creates the file empty when it does not exist yet. Without a
    /// configured path this is a no-op returning an empty list.
    pub fn load(&mut self) -> Result<Vec<String>> {
        let Some(path) = self.storage_path.as_ref() else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            fs::write(path, "")
                .with_context(|| format!("creating history file: {}", path.display()))?;
        }
        let bytes = fs::read(path).with_context(|| format!("reading history file: {}", path.display()))?;
        // Invalid UTF-8 becomes U+FFFD
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<String> = text.lines().take(self.cap).map(str::to_string).collect();
        debug!(path = %path.display(), entries = lines.len(), "loaded history");
        self.entries = lines.iter().cloned().collect();
        Ok(lines)
    }

    /// Writes the most recent `cap` entries, newline-joined.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = self.storage_path.as_ref() else {
            return Ok(());
        };
        let skip = self.entries.len().saturating_sub(self.cap);
        let text = self.entries().skip(skip).collect::<Vec<_>>().join("\n");
        fs::write(path, text).with_context(|| format!("writing history file: {}", path.display()))?;
        debug!(path = %path.display(), entries = self.entries.len() - skip, "persisted history");
        Ok(())
    }
}
