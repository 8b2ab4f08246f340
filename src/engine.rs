//! The session engine: reader thread, handshake and the mode loop.

use crate::alive::AliveFlag;
use crate::config::{Handshake, SessionConfig};
use crate::error::ScriptError;
use crate::framer::ResponseFramer;
use crate::input::OperatorInput;
use crate::mode::{Mode, ModeController, OperatorAction};
use crate::reader::StreamReader;
use crate::rx_buffer::RxBuffer;
use crate::script::{ScriptContext, ScriptInterpreter, ScriptOutcome};
use crate::session::{Command, Session};
use crate::transcript::Transcript;
use crate::transport::TransportPair;
use anyhow::{Context as _, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns a running session: the stream reader, the command session, the
/// script stack and the mode state machine.
pub struct Engine {
    session: Session,
    reader: StreamReader,
    interpreter: ScriptInterpreter,
    handshake: Handshake,
    response_timeout: Duration,
    manual: bool,
    alive: AliveFlag,
}

impl Engine {
    /// Start the stream reader on `transport` and set up a session with
    /// `config`. Console output goes to stdout.
    pub fn start(transport: TransportPair, config: &SessionConfig) -> Result<Self> {
        let (reader, writer) = transport;
        let alive = AliveFlag::new();
        let rx = RxBuffer::new();
        let reader = StreamReader::spawn(reader, rx.clone(), alive.clone(), config.reader_wait)
            .context("Failed to start stream reader")?;

        for sentry in &config.sentries {
            debug!(%sentry, "sentry");
        }
        let framer = ResponseFramer::new(config.sentries.clone());
        let session = Session::new(writer, rx, framer, config.poll_interval, alive.clone());

        Ok(Engine {
            session,
            reader,
            interpreter: ScriptInterpreter::new(config.response_timeout, alive.clone()),
            handshake: config.handshake.clone(),
            response_timeout: config.response_timeout,
            manual: false,
            alive,
        })
    }

    /// Send console output to `handler` instead of stdout.
    pub fn with_output_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.session = self.session.with_output_handler(handler);
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.session = self.session.with_transcript(transcript);
        self
    }

    /// Start in interactive mode even with a script queued, and return to
    /// it instead of halting once all scripts end.
    pub fn manual(mut self, enabled: bool) -> Self {
        self.manual = enabled;
        self
    }

    /// The flag that stops the session when cleared.
    pub fn alive(&self) -> AliveFlag {
        self.alive.clone()
    }

    /// Queue the script at `path` as the startup script.
    pub fn load_script(&mut self, path: &Path) -> Result<(), ScriptError> {
        self.interpreter.enter(path)
    }

    /// Queue an in-memory script as the startup script.
    pub fn push_script(&mut self, script: ScriptContext) {
        self.interpreter.push(script);
    }

    /// Number of scripts currently on the stack.
    pub fn script_depth(&self) -> usize {
        self.interpreter.depth()
    }

    /// Run the handshake, then alternate between scripted and interactive
    /// mode until the session halts.
    ///
    /// Starts in scripted mode if a script was queued, unless in manual mode.
    /// A queued script then waits for a bare `enscom`. Returns an error only
    /// for a failed handshake or a transport failure.
    pub async fn run(&mut self, input: &mut dyn OperatorInput) -> Result<()> {
        self.session
            .handshake(&self.handshake, self.response_timeout)
            .await
            .context("Link check failed")?;
        info!("link check passed");

        let mut modes = ModeController::new(self.interpreter.depth() > 0, self.manual);
        loop {
            if !self.alive.is_alive() {
                modes.halt();
            }
            match modes.mode() {
                Mode::Halted => break,
                Mode::Scripted => match self.interpreter.run(&mut self.session).await? {
                    ScriptOutcome::Exhausted => modes.scripts_exhausted(),
                    ScriptOutcome::Interactive => modes.enter_interactive(),
                    ScriptOutcome::Halted => modes.halt(),
                },
                Mode::Interactive => self.interactive_step(&mut modes, input).await?,
            }
        }
        info!("session halted");
        Ok(())
    }

    async fn interactive_step(
        &mut self,
        modes: &mut ModeController,
        input: &mut dyn OperatorInput,
    ) -> Result<()> {
        let line = tokio::select! {
            line = input.next_line() => line.context("Failed to read operator input")?,
            _ = self.alive.cleared() => None,
        };
        let Some(line) = line else {
            debug!("operator input closed");
            modes.halt();
            return Ok(());
        };

        match OperatorAction::classify(&line) {
            OperatorAction::Ignore => {}
            OperatorAction::Halt => modes.halt(),
            OperatorAction::RunScript(path) => match self.interpreter.enter(&path) {
                Ok(()) => modes.enter_scripted(),
                Err(e) => {
                    warn!("{e}");
                    self.session.emit(format!("{e}\n").as_bytes());
                }
            },
            OperatorAction::ResumeScript => {
                if self.interpreter.depth() > 0 {
                    modes.enter_scripted();
                } else {
                    warn!("no suspended script to resume");
                    self.session.emit(b"no suspended script to resume\n");
                }
            }
            OperatorAction::Send(text) => {
                self.session
                    .send(&Command::interactive(text), self.response_timeout)
                    .await?;
            }
        }
        Ok(())
    }

    /// Stop the stream reader, wait for it, then release the transport.
    pub fn shutdown(self) -> Result<()> {
        self.alive.clear();
        self.reader.join();
        self.session.close()
    }
}
