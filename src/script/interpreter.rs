//! Executes script directives against a [`Session`].

use super::directive::{Directive, Iterations};
use super::loop_plan::{LoopAction, LoopPlan};
use super::{ScriptContext, ScriptStack};
use crate::alive::AliveFlag;
use crate::error::ScriptError;
use crate::session::{Command, Session};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why [`ScriptInterpreter::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Every script on the stack has finished.
    Exhausted,
    /// An `enman` asked for interactive mode. The stack is kept.
    Interactive,
    /// The alive flag was cleared.
    Halted,
}

/// Runs the active script until it hands control back.
pub struct ScriptInterpreter {
    stack: ScriptStack,
    timeout: Duration,
    alive: AliveFlag,
}

impl ScriptInterpreter {
    /// `timeout` is the response timeout for every scripted command.
    pub fn new(timeout: Duration, alive: AliveFlag) -> Self {
        Self {
            stack: ScriptStack::new(),
            timeout,
            alive,
        }
    }

    pub fn stack(&self) -> &ScriptStack {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Make `context` the active script. The previous one resumes after it.
    pub fn push(&mut self, context: ScriptContext) {
        info!(script = context.name(), depth = self.stack.depth() + 1, "entering script");
        self.stack.push(context);
    }

    /// Open the script at `path` and make it active.
    ///
    /// On failure the stack is left untouched.
    pub fn enter(&mut self, path: &Path) -> Result<(), ScriptError> {
        let context = ScriptContext::open(path)?;
        self.push(context);
        Ok(())
    }

    /// Drop every script, suspended or not.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Execute directives until the stack empties, `enman` is reached or the
    /// session shuts down.
    ///
    /// Script problems are logged and skipped. Only a transport failure is
    /// returned as an error.
    pub async fn run(&mut self, session: &mut Session) -> Result<ScriptOutcome> {
        loop {
            if !self.alive.is_alive() {
                return Ok(ScriptOutcome::Halted);
            }
            let Some(context) = self.stack.active_mut() else {
                return Ok(ScriptOutcome::Exhausted);
            };
            let Some(line) = context.next_line() else {
                self.leave_active("end of script");
                continue;
            };
            let script = context.name().to_string();
            debug!(script = %script, line = line.number, text = %line.text, "directive");

            match Directive::parse(&line.text) {
                Directive::Command(text) => {
                    session.send(&Command::scripted(text), self.timeout).await?;
                }
                Directive::LoopBegin(iterations) => {
                    match LoopPlan::build(context, iterations, line.number) {
                        Ok(plan) => self.run_loop(&plan, session).await?,
                        Err(e) => warn!("{e}, loop skipped"),
                    }
                }
                Directive::LoopEnd => {
                    warn!(script = %script, line = line.number, "loopend without loopbegin, ignored");
                }
                Directive::Sleep(duration) => self.sleep(duration).await,
                Directive::Break => self.leave_active("break"),
                Directive::Enman => {
                    info!(script = %script, line = line.number, "switching to interactive mode");
                    return Ok(ScriptOutcome::Interactive);
                }
                Directive::Enscom(Some(path)) => {
                    if let Err(e) = self.enter(&path) {
                        warn!("{script}:{}: {e}", line.number);
                    }
                }
                Directive::Enscom(None) => {
                    warn!(
                        "{}",
                        ScriptError::InvalidDirective {
                            script,
                            line: line.number,
                            text: line.text,
                            reason: "missing script path".into(),
                        }
                    );
                }
                Directive::Invalid { keyword, reason } => {
                    warn!(
                        "{}, line discarded",
                        ScriptError::InvalidDirective {
                            script: script.clone(),
                            line: line.number,
                            text: line.text,
                            reason,
                        }
                    );
                    if keyword == Directive::LOOP_BEGIN {
                        // The body belongs to a loop that will never run.
                        if let Err(e) = LoopPlan::build(context, Iterations::Count(1), line.number)
                        {
                            warn!("{e}, loop skipped");
                        }
                    }
                }
            }
        }
    }

    /// Pop the active script and resume its mother, if any.
    fn leave_active(&mut self, reason: &str) {
        let Some(finished) = self.stack.pop() else {
            return;
        };
        match self.stack.active() {
            Some(mother) => info!(
                script = finished.name(),
                resuming = mother.name(),
                "{reason}, returning to mother script"
            ),
            None => info!(script = finished.name(), "{reason}, no scripts left"),
        }
    }

    async fn run_loop(&mut self, plan: &LoopPlan, session: &mut Session) -> Result<()> {
        if plan.actions.is_empty() {
            if plan.is_unbounded() {
                warn!("empty unbounded loop, waiting until the session is stopped");
                self.alive.cleared().await;
            }
            return Ok(());
        }
        if plan.is_unbounded() {
            info!("starting unbounded loop, runs until the session is stopped");
        }
        let mut round: u32 = 0;
        while self.alive.is_alive() {
            if let Iterations::Count(n) = plan.iterations {
                if round >= n {
                    break;
                }
            }
            round = round.saturating_add(1);
            debug!(round, "loop iteration");
            for action in &plan.actions {
                if !self.alive.is_alive() {
                    break;
                }
                match action {
                    LoopAction::SendCommand(text) => {
                        session
                            .send(&Command::scripted(text.as_str()), self.timeout)
                            .await?;
                    }
                    LoopAction::Sleep(duration) => self.sleep(*duration).await,
                }
            }
        }
        Ok(())
    }

    /// Pause without holding up the stream reader; cut short on shutdown.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.alive.cleared() => {}
        }
    }
}
