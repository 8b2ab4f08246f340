//! Script files and the stack of scripts being executed.
//!
//! A script includes another with `enscom`; the including ("mother") script
//! waits on the [`ScriptStack`] and resumes at the next line once the child
//! ends or `break`s.

mod directive;
mod interpreter;
mod loop_plan;

pub use directive::{Directive, Iterations};
pub use interpreter::{ScriptInterpreter, ScriptOutcome};
pub use loop_plan::{LoopAction, LoopPlan};

use crate::error::ScriptError;
use std::path::Path;

/// File extension every script must carry.
pub const SCRIPT_EXTENSION: &str = "scom";

/// A non-blank, non-comment script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based line number in the script.
    pub number: usize,
    pub text: String,
}

/// An open script and its read position.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    name: String,
    lines: Vec<String>,
    cursor: usize,
}

impl ScriptContext {
    /// Open a script file after checking that it exists and has the
    /// `.scom` extension.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        validate_script_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ScriptError::ScriptFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_source(path.display().to_string(), &content))
    }

    /// Build a script from text already in memory.
    pub fn from_source(name: impl Into<String>, content: &str) -> Self {
        Self {
            name: name.into(),
            lines: content.lines().map(str::to_string).collect(),
            cursor: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advance to the next line that is neither blank nor a `#` comment.
    pub fn next_line(&mut self) -> Option<ScriptLine> {
        while self.cursor < self.lines.len() {
            let idx = self.cursor;
            self.cursor += 1;
            let text = self.lines[idx].trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            return Some(ScriptLine {
                number: idx + 1,
                text: text.to_string(),
            });
        }
        None
    }
}

/// Check that `path` names an existing `.scom` file.
pub fn validate_script_path(path: &Path) -> Result<(), ScriptError> {
    let fail = |reason: &str| ScriptError::ScriptFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if !path.exists() {
        return Err(fail("no such file"));
    }
    if !path.is_file() {
        return Err(fail("not a regular file"));
    }
    if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
        return Err(fail(&format!("expected a .{SCRIPT_EXTENSION} file")));
    }
    Ok(())
}

/// Scripts being executed; the last entry is the active one.
#[derive(Debug, Default)]
pub struct ScriptStack {
    contexts: Vec<ScriptContext>,
}

impl ScriptStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, context: ScriptContext) {
        self.contexts.push(context);
    }

    pub fn pop(&mut self) -> Option<ScriptContext> {
        self.contexts.pop()
    }

    pub fn active(&self) -> Option<&ScriptContext> {
        self.contexts.last()
    }

    pub fn active_mut(&mut self) -> Option<&mut ScriptContext> {
        self.contexts.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    /// Names from the outermost script to the active one.
    pub fn names(&self) -> Vec<&str> {
        self.contexts.iter().map(ScriptContext::name).collect()
    }
}
