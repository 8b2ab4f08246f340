//! Transcript of everything sent and received.
//!
//! One line per event:
//!
//! ```text
//! Feb 09 22:38:33 [AO] 'AT\r'
//! Feb 09 22:38:33 [AI] 'AT\r\r\nOK\r\n'
//! ```
//!
//! `A`/`M` is the command source (script or manual), `O`/`I` the direction.

use crate::session::Source;
use anyhow::{Context as _, Result};
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    fn tag(self) -> char {
        match self {
            Direction::Out => 'O',
            Direction::In => 'I',
        }
    }
}

/// Line-oriented transcript writer.
pub struct Transcript {
    out: Box<dyn Write + Send>,
    timestamps: bool,
}

impl Transcript {
    /// Create (or truncate) a transcript file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file: {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Box::new(out),
            timestamps: true,
        }
    }

    /// Leave the timestamp column empty. Makes output reproducible.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    fn timestamp(&self) -> String {
        if self.timestamps {
            Local::now().format("%b %d %H:%M:%S").to_string()
        } else {
            String::new()
        }
    }

    /// Record data moving in `direction` for a command from `source`.
    pub fn record(&mut self, source: Source, direction: Direction, data: &[u8]) -> Result<()> {
        writeln!(
            self.out,
            "{} [{}{}] '{}'",
            self.timestamp(),
            source.tag(),
            direction.tag(),
            escape(data)
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Record a free-form note such as a timeout.
    pub fn note(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{} {}", self.timestamp(), text)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Escape control characters, quotes and backslashes for a single-quoted
/// transcript field.
pub fn escape(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
