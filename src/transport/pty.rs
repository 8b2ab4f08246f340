//! Run a local program in a pseudo terminal and talk to it like a device.
//!
//! Handy for modem simulators and for exercising scripts without hardware.
//! The PTY master only offers blocking reads, so a helper thread drains it
//! into a channel and [`PtyReader::poll_read`] waits on that channel.

use super::{ChannelReader, TransportPair, TransportReader, TransportWriter};
use crate::error::TransportError;
use anyhow::Result;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Spawn `program` with `args` in a new PTY and return its transport halves.
pub fn spawn(program: &str, args: &[String]) -> Result<TransportPair, TransportError> {
    let spawn_err = |reason: String| TransportError::Spawn {
        program: program.to_string(),
        reason,
    };

    let pty_system = portable_pty::native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| spawn_err(format!("failed to open PTY: {e}")))?;

    let mut cmd = CommandBuilder::new(program);
    for arg in args {
        cmd.arg(arg);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| spawn_err(format!("failed to spawn command: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| spawn_err(format!("failed to get PTY writer: {e}")))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| spawn_err(format!("failed to get PTY reader: {e}")))?;

    debug!(program, "spawned program in PTY");
    Ok((
        Box::new(PtyReader::new(reader)),
        Box::new(PtyWriter {
            master: pair.master,
            child,
            writer,
        }),
    ))
}

/// Receiving half of a PTY transport.
pub struct PtyReader(ChannelReader);

impl PtyReader {
    fn new<R: Read + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = channel();
        thread::spawn(move || {
            let mut buffer = [0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        Self(ChannelReader::new(rx))
    }
}

impl TransportReader for PtyReader {
    fn poll_read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        self.0.poll_read(buf, wait)
    }
}

/// Sending half of a PTY transport. Owns the child process.
pub struct PtyWriter {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

impl TransportWriter for PtyWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
            self.child.wait()?;
        }
        Ok(())
    }
}
