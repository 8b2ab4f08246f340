//! One command at a time over the transport.
//!
//! [`Session::send`] writes a command, then watches the shared receive buffer
//! until the framer reports a complete response. The timeout is an idle
//! timeout: every new byte from the device restarts it.

use crate::alive::AliveFlag;
use crate::config::Handshake;
use crate::error::HandshakeError;
use crate::framer::ResponseFramer;
use crate::rx_buffer::RxBuffer;
use crate::transcript::{Direction, Transcript, escape};
use crate::transport::TransportWriter;
use anyhow::{Context as _, Result};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Appended to every command before it is written.
pub const LINE_TERMINATOR: &str = "\r";

/// Printed after each response on the console.
pub const SEPARATOR: &str = "-----------------";

type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Interactive,
    Scripted,
}

impl Source {
    /// Transcript tag: `M` for manual entry, `A` for automated.
    pub fn tag(self) -> char {
        match self {
            Source::Interactive => 'M',
            Source::Scripted => 'A',
        }
    }
}

/// A command line to send to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub source: Source,
}

impl Command {
    pub fn scripted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: Source::Scripted,
        }
    }

    pub fn interactive(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: Source::Interactive,
        }
    }

    /// Bytes put on the wire, terminator included.
    pub fn wire(&self) -> Vec<u8> {
        format!("{}{}", self.text, LINE_TERMINATOR).into_bytes()
    }
}

/// Result of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Framed response with the command echo removed. Empty on timeout.
    pub text: String,
    pub timed_out: bool,
}

impl Response {
    fn timed_out() -> Self {
        Self {
            text: String::new(),
            timed_out: true,
        }
    }
}

/// Issues commands and collects their responses.
pub struct Session {
    writer: Box<dyn TransportWriter>,
    rx: RxBuffer,
    framer: ResponseFramer,
    poll_interval: Duration,
    alive: AliveFlag,
    transcript: Option<Transcript>,
    output: OutputHandler,
}

impl Session {
    /// Create a session that prints responses to stdout.
    pub fn new(
        writer: Box<dyn TransportWriter>,
        rx: RxBuffer,
        framer: ResponseFramer,
        poll_interval: Duration,
        alive: AliveFlag,
    ) -> Self {
        Self {
            writer,
            rx,
            framer,
            poll_interval,
            alive,
            transcript: None,
            output: Arc::new(|data: &[u8]| {
                let mut stdout = io::stdout();
                let _ = stdout.write_all(data);
                let _ = stdout.flush();
            }),
        }
    }

    /// Send console output to `handler` instead of stdout.
    pub fn with_output_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.output = Arc::new(handler);
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn rx_buffer(&self) -> &RxBuffer {
        &self.rx
    }

    pub fn alive(&self) -> &AliveFlag {
        &self.alive
    }

    /// Pass bytes to the console output handler.
    pub fn emit(&self, data: &[u8]) {
        (self.output)(data);
    }

    fn record(&mut self, source: Source, direction: Direction, data: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.record(source, direction, data) {
                warn!("failed to write log file: {e:#}");
            }
        }
    }

    fn note(&mut self, text: &str) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.note(text) {
                warn!("failed to write log file: {e:#}");
            }
        }
    }

    /// Send `cmd` and wait for its response.
    ///
    /// The response is framed from the device's echo of `cmd`, or from the
    /// first byte received after the write if there is no echo. Anything
    /// ahead of it, such as a late reply to a command that timed out, is
    /// shown separately and never taken as this command's response.
    ///
    /// Gives up once `timeout` passes without any new data, returning a
    /// [`Response`] with `timed_out` set and leaving the receive buffer as it
    /// was. Only a failing transport write is an error.
    pub async fn send(&mut self, cmd: &Command, timeout: Duration) -> Result<Response> {
        let wire = cmd.wire();
        debug!(source = ?cmd.source, command = %cmd.text, "sending command");
        let mark = self.rx.len();
        self.record(cmd.source, Direction::Out, &wire);
        self.writer
            .write(&wire)
            .with_context(|| format!("Failed to send command: {}", cmd.text))?;

        let initial = retry_budget(timeout, self.poll_interval);
        let mut budget = initial;
        let mut seen = self.rx.received();
        loop {
            if let Some(taken) = self
                .rx
                .take_response(&self.framer, mark, cmd.text.as_bytes())
            {
                if !taken.stray.is_empty() {
                    self.surface_stray(cmd, &taken.stray);
                }
                let raw = taken.response;
                self.record(cmd.source, Direction::In, &raw);
                let text = strip_echo(&raw, &cmd.text);
                self.emit(text.as_bytes());
                self.emit(format!("\n{SEPARATOR}\n").as_bytes());
                return Ok(Response {
                    text,
                    timed_out: false,
                });
            }
            if !self.alive.is_alive() {
                debug!(command = %cmd.text, "shutdown while waiting for response");
                return Ok(Response::timed_out());
            }

            let received = self.rx.received();
            if received != seen {
                seen = received;
                budget = initial;
            } else {
                budget -= 1;
                if budget == 0 {
                    break;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let report = format!(
            "***SERROR: '{}' timed out with no/incomplete response",
            cmd.text
        );
        warn!(command = %cmd.text, ?timeout, "response timed out");
        self.note(&report);
        self.emit(format!("{report}\n{SEPARATOR}\n").as_bytes());
        Ok(Response::timed_out())
    }

    /// Show data that arrived ahead of the response to `cmd`.
    fn surface_stray(&mut self, cmd: &Command, stray: &[u8]) {
        warn!(
            command = %cmd.text,
            data = %escape(stray),
            "unexpected data ahead of response"
        );
        self.record(cmd.source, Direction::In, stray);
        self.emit(stray);
        self.emit(format!("\n{SEPARATOR}\n").as_bytes());
    }

    /// Check the link before anything else runs.
    pub async fn handshake(&mut self, handshake: &Handshake, timeout: Duration) -> Result<()> {
        let response = self
            .send(&Command::scripted(handshake.command.as_str()), timeout)
            .await?;
        if response.timed_out {
            return Err(HandshakeError::TimedOut {
                command: handshake.command.clone(),
            }
            .into());
        }
        if !response.text.contains(handshake.expect.as_str()) {
            return Err(HandshakeError::Mismatch {
                command: handshake.command.clone(),
                expected: handshake.expect.clone(),
                got: response.text,
            }
            .into());
        }
        debug!(command = %handshake.command, "handshake succeeded");
        Ok(())
    }

    /// Release the transport. Call only after the stream reader has stopped.
    pub fn close(mut self) -> Result<()> {
        self.writer.close().context("Failed to close transport")
    }
}

/// Number of buffer checks that make up `timeout`.
fn retry_budget(timeout: Duration, poll_interval: Duration) -> u32 {
    if poll_interval.is_zero() {
        return 1;
    }
    let checks = timeout.as_nanos().div_ceil(poll_interval.as_nanos());
    u32::try_from(checks).unwrap_or(u32::MAX).max(1)
}

/// Drop the device's echo of `command` from the front of a response.
///
/// The echo is the command followed by an optional `\r` and then an optional
/// `\n`; anything else at the front is left alone.
fn strip_echo(raw: &[u8], command: &str) -> String {
    let text = String::from_utf8_lossy(raw);
    if command.is_empty() {
        return text.into_owned();
    }
    match text.strip_prefix(command) {
        Some(rest) => {
            let rest = rest.strip_prefix('\r').unwrap_or(rest);
            let rest = rest.strip_prefix('\n').unwrap_or(rest);
            rest.to_string()
        }
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::{Sentry, Wildcard};
    use crate::reader::StreamReader;
    use crate::transport::loopback::{self, LoopbackHandle};
    use std::sync::Mutex;

    struct Harness {
        session: Session,
        handle: LoopbackHandle,
        reader: StreamReader,
        console: Arc<Mutex<Vec<u8>>>,
    }

    impl Harness {
        fn new<F>(responder: F) -> Self
        where
            F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
        {
            let ((reader, writer), handle) = loopback::open(responder);
            let rx = RxBuffer::new();
            let alive = AliveFlag::new();
            let reader =
                StreamReader::spawn(reader, rx.clone(), alive.clone(), Duration::from_millis(5))
                    .unwrap();
            let framer = ResponseFramer::new(vec![
                Sentry::plain("\r\nOK\r\n"),
                Sentry::plain("\r\nERROR\r\n"),
                Sentry::wildcard("\r\n+CME ERROR:", Wildcard::CrLf),
            ]);
            let console = Arc::new(Mutex::new(Vec::new()));
            let sink = console.clone();
            let session = Session::new(writer, rx, framer, Duration::from_millis(10), alive)
                .with_output_handler(move |data| sink.lock().unwrap().extend_from_slice(data));
            Self {
                session,
                handle,
                reader,
                console,
            }
        }

        fn console(&self) -> String {
            String::from_utf8_lossy(&self.console.lock().unwrap()).into_owned()
        }

        fn shutdown(self) {
            self.session.alive().clear();
            self.reader.join();
            self.session.close().unwrap();
        }
    }

    fn echo_then(reply: &'static str) -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
        move |line: &[u8]| {
            let mut out = line.to_vec();
            out.extend_from_slice(reply.as_bytes());
            out
        }
    }

    #[tokio::test]
    async fn test_response_split_over_chunks() {
        let mut h = Harness::new(|_: &[u8]| Vec::new());
        let handle = h.handle.clone();
        tokio::spawn(async move {
            handle.inject(b"AT\r\r\n");
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.inject(b"OK\r\n");
        });

        let response = h
            .session
            .send(&Command::scripted("AT"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.timed_out);
        assert_eq!(response.text, "\r\nOK\r\n");
        assert!(h.session.rx_buffer().is_empty());
        assert_eq!(h.handle.written_lines(), vec!["AT\r"]);
        h.shutdown();
    }

    #[tokio::test]
    async fn test_timeout_leaves_buffer_unchanged() {
        let mut h = Harness::new(echo_then("\r\n"));
        let response = h
            .session
            .send(&Command::interactive("AT+COPS?"), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(response.timed_out);
        assert!(response.text.is_empty());
        assert_eq!(h.session.rx_buffer().snapshot(), b"AT+COPS?\r\r\n");
        assert!(h.console().contains("***SERROR: 'AT+COPS?' timed out"));
        h.shutdown();
    }

    #[tokio::test]
    async fn test_trickling_data_restarts_timeout() {
        let mut h = Harness::new(|_: &[u8]| Vec::new());
        let handle = h.handle.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(60)).await;
                handle.inject(b"+COPS: 0,0,\"Carrier\"");
            }
            handle.inject(b"\r\nOK\r\n");
        });

        let started = std::time::Instant::now();
        let response = h
            .session
            .send(&Command::scripted("AT+COPS?"), Duration::from_millis(150))
            .await
            .unwrap();
        assert!(!response.timed_out);
        assert!(started.elapsed() > Duration::from_millis(150));
        assert!(response.text.ends_with("\r\nOK\r\n"));
        h.shutdown();
    }

    #[tokio::test]
    async fn test_late_reply_does_not_answer_next_command() {
        let mut h = Harness::new(|line: &[u8]| {
            if line.starts_with(b"AT+SLOW") {
                return Vec::new();
            }
            let mut out = line.to_vec();
            out.extend_from_slice(b"\r\nATI-REPLY\r\n\r\nOK\r\n");
            out
        });
        let response = h
            .session
            .send(&Command::scripted("AT+SLOW"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(response.timed_out);

        let late = b"AT+SLOW\r\r\n+SLOW: 1\r\n\r\nOK\r\n";
        h.handle.inject(late);
        for _ in 0..100 {
            if h.session.rx_buffer().len() == late.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let response = h
            .session
            .send(&Command::interactive("ATI"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.timed_out);
        assert_eq!(response.text, "\r\nATI-REPLY\r\n\r\nOK\r\n");
        assert!(h.session.rx_buffer().is_empty());
        // The late reply still reaches the operator.
        assert!(h.console().contains("+SLOW: 1"), "{}", h.console());
        h.shutdown();
    }

    #[tokio::test]
    async fn test_wildcard_response() {
        let mut h = Harness::new(echo_then("\r\n+CME ERROR: 10\r\n"));
        let response = h
            .session
            .send(&Command::scripted("AT+CPIN?"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.text, "\r\n+CME ERROR: 10\r\n");
        h.shutdown();
    }

    #[tokio::test]
    async fn test_console_shows_response_and_separator() {
        let mut h = Harness::new(echo_then("\r\nOK\r\n"));
        h.session
            .send(&Command::interactive("ATE1"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(h.console(), format!("\r\nOK\r\n\n{SEPARATOR}\n"));
        h.shutdown();
    }

    #[tokio::test]
    async fn test_handshake() {
        let mut h = Harness::new(echo_then("\r\nOK\r\n"));
        h.session
            .handshake(&Handshake::default(), Duration::from_secs(1))
            .await
            .unwrap();
        h.shutdown();

        let mut h = Harness::new(echo_then("\r\nERROR\r\n"));
        let err = h
            .session
            .handshake(&Handshake::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandshakeError>(),
            Some(HandshakeError::Mismatch { .. })
        ));
        h.shutdown();

        let mut h = Harness::new(|_: &[u8]| Vec::new());
        let err = h
            .session
            .handshake(&Handshake::default(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandshakeError>(),
            Some(HandshakeError::TimedOut { .. })
        ));
        h.shutdown();
    }

    #[test]
    fn test_strip_echo() {
        assert_eq!(strip_echo(b"AT\r\r\nOK\r\n", "AT"), "\r\nOK\r\n");
        assert_eq!(strip_echo(b"AT\r\nOK\r\n", "AT"), "OK\r\n");
        assert_eq!(strip_echo(b"\r\nRING\r\n", "AT"), "\r\nRING\r\n");
        assert_eq!(strip_echo(b"\r\nOK\r\n", ""), "\r\nOK\r\n");
    }

    #[test]
    fn test_retry_budget() {
        let poll = Duration::from_millis(10);
        assert_eq!(retry_budget(Duration::from_secs(3), poll), 300);
        assert_eq!(retry_budget(Duration::from_millis(15), poll), 2);
        assert_eq!(retry_budget(Duration::ZERO, poll), 1);
        assert_eq!(retry_budget(Duration::from_secs(1), Duration::ZERO), 1);
    }

    #[test]
    fn test_command_wire_and_tags() {
        assert_eq!(Command::scripted("ATI").wire(), b"ATI\r");
        assert_eq!(Source::Scripted.tag(), 'A');
        assert_eq!(Source::Interactive.tag(), 'M');
    }
}
