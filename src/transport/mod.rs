//! Byte-stream transports.
//!
//! A transport is split into a [`TransportReader`], owned by the stream
//! reader thread, and a [`TransportWriter`], owned by the session. Opening a
//! transport returns both halves.

use anyhow::{Result, anyhow};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

pub mod loopback;
pub mod pty;
#[cfg(unix)]
pub mod serial;

/// Receiving half of a transport.
pub trait TransportReader: Send {
    /// Wait at most `wait` for data and read what is available into `buf`.
    ///
    /// Returns `Ok(0)` if nothing arrived in time. An error means the device
    /// is gone and the reader should stop.
    fn poll_read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize>;
}

/// Sending half of a transport.
pub trait TransportWriter: Send {
    /// Write all of `data` and flush it to the device.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Release the device. Called once, after the reader has stopped.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Both halves of an opened transport.
pub type TransportPair = (Box<dyn TransportReader>, Box<dyn TransportWriter>);

/// Reader over a channel of chunks filled by some other thread.
///
/// A chunk larger than the caller's buffer is handed out over several calls.
pub(crate) struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl ChannelReader {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
        }
    }
}

impl TransportReader for ChannelReader {
    fn poll_read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(wait) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("transport closed its output"));
                }
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
