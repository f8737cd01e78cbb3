//! Console printer: plain text, coloured when stdout is a terminal.

use std::io::{self, Write};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Error,
    Notice,
}

pub struct TextPrinter {
    pub color: bool,
}

impl TextPrinter {
    pub fn for_stdout() -> Self {
        Self { color: io::stdout().is_terminal() }
    }

    pub fn render(&self, text: &str, tone: Tone) -> String {
        if !self.color {
            return text.to_string();
        }
        match tone {
            Tone::Plain => text.to_string(),
            Tone::Error => text.red().to_string(),
            Tone::Notice => text.yellow().to_string(),
        }
    }

    pub fn print(&self, text: &str, tone: Tone) {
        println!("{}", self.render(text, tone));
    }

    pub fn prompt(&self, prompt: &str) {
        let mut out = io::stdout();
        let _ = write!(out, "{}", if self.color { prompt.cyan().to_string() } else { prompt.to_string() });
        let _ = out.flush();
    }
}
