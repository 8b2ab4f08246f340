//! Interactive / scripted / halted state machine.
//!
//! ```text
//!              enscom <path>
//!   Interactive ────────────► Scripted
//!        ▲  ◄──────────────────  │
//!        │   enman, or scripts   │ scripts exhausted
//!        │   exhausted (manual)  │ (not manual)
//!   exit │                       ▼
//!        └─────────────────►  Halted
//! ```

use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Scripted,
    /// Terminal: the session shuts down.
    Halted,
}

/// Tracks the current [`Mode`] and applies transitions.
#[derive(Debug)]
pub struct ModeController {
    mode: Mode,
    manual: bool,
}

impl ModeController {
    /// Start in [`Mode::Scripted`] when a script was supplied, otherwise in
    /// [`Mode::Interactive`].
    ///
    /// `manual` forces an interactive start even with a script supplied; the
    /// script waits on the stack until the operator resumes it. It also makes
    /// finishing every script drop to interactive mode instead of halting.
    pub fn new(script_supplied: bool, manual: bool) -> Self {
        let mode = if script_supplied && !manual {
            Mode::Scripted
        } else {
            Mode::Interactive
        };
        info!(?mode, "session mode");
        Self { mode, manual }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn transition(&mut self, next: Mode) {
        if self.mode == Mode::Halted || self.mode == next {
            return;
        }
        info!(from = ?self.mode, to = ?next, "mode change");
        self.mode = next;
    }

    /// The script stack ran empty.
    pub fn scripts_exhausted(&mut self) {
        if self.mode != Mode::Scripted {
            return;
        }
        if self.manual {
            self.transition(Mode::Interactive);
        } else {
            self.transition(Mode::Halted);
        }
    }

    /// A script executed `enman`.
    pub fn enter_interactive(&mut self) {
        self.transition(Mode::Interactive);
    }

    /// The operator started or resumed a script.
    pub fn enter_scripted(&mut self) {
        self.transition(Mode::Scripted);
    }

    pub fn halt(&mut self) {
        self.transition(Mode::Halted);
    }
}

/// What a line typed by the operator asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    /// Blank line.
    Ignore,
    /// `exit` or `break`.
    Halt,
    /// `enscom <path>`: run a script.
    RunScript(PathBuf),
    /// Bare `enscom`: resume scripts suspended by `enman`.
    ResumeScript,
    /// Anything else goes to the device.
    Send(String),
}

impl OperatorAction {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Ignore;
        }
        let (keyword, args) = line
            .split_once(char::is_whitespace)
            .map(|(k, a)| (k, a.trim()))
            .unwrap_or((line, ""));
        match (keyword, args) {
            ("exit" | "break", "") => Self::Halt,
            ("enscom", "") => Self::ResumeScript,
            ("enscom", path) => Self::RunScript(PathBuf::from(path)),
            _ => Self::Send(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_mode() {
        assert_eq!(ModeController::new(true, false).mode(), Mode::Scripted);
        assert_eq!(ModeController::new(false, false).mode(), Mode::Interactive);
        assert_eq!(ModeController::new(false, true).mode(), Mode::Interactive);
        assert_eq!(ModeController::new(true, true).mode(), Mode::Interactive);
    }

    #[test]
    fn test_scripts_exhausted_without_fallback_halts() {
        let mut modes = ModeController::new(true, false);
        modes.scripts_exhausted();
        assert_eq!(modes.mode(), Mode::Halted);
    }

    #[test]
    fn test_scripts_exhausted_in_manual_mode_goes_interactive() {
        let mut modes = ModeController::new(true, true);
        modes.enter_scripted();
        assert_eq!(modes.mode(), Mode::Scripted);
        modes.scripts_exhausted();
        assert_eq!(modes.mode(), Mode::Interactive);
    }

    #[test]
    fn test_enman_and_back() {
        let mut modes = ModeController::new(true, false);
        modes.enter_interactive();
        assert_eq!(modes.mode(), Mode::Interactive);
        // Exhaustion only applies while scripted.
        modes.scripts_exhausted();
        assert_eq!(modes.mode(), Mode::Interactive);
        modes.enter_scripted();
        assert_eq!(modes.mode(), Mode::Scripted);
    }

    #[test]
    fn test_halted_is_terminal() {
        let mut modes = ModeController::new(false, true);
        modes.halt();
        modes.enter_scripted();
        modes.enter_interactive();
        assert_eq!(modes.mode(), Mode::Halted);
    }

    #[test]
    fn test_classify_operator_input() {
        assert_eq!(OperatorAction::classify(""), OperatorAction::Ignore);
        assert_eq!(OperatorAction::classify("   \r"), OperatorAction::Ignore);
        assert_eq!(OperatorAction::classify("exit"), OperatorAction::Halt);
        assert_eq!(OperatorAction::classify("break"), OperatorAction::Halt);
        assert_eq!(OperatorAction::classify("enscom"), OperatorAction::ResumeScript);
        assert_eq!(
            OperatorAction::classify("enscom attach.scom"),
            OperatorAction::RunScript(PathBuf::from("attach.scom"))
        );
        assert_eq!(
            OperatorAction::classify(" AT+CSQ "),
            OperatorAction::Send("AT+CSQ".into())
        );
        assert_eq!(
            OperatorAction::classify("exit now"),
            OperatorAction::Send("exit now".into())
        );
    }
}
