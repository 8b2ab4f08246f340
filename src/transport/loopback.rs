//! In-memory transport that answers through a closure.
//!
//! Every write is recorded and passed to the responder; whatever it returns
//! is delivered to the reader as if the device had sent it. Extra data, such
//! as unsolicited result codes or a response split over several chunks, can
//! be pushed with [`LoopbackHandle::inject`].
//!
//! ```
//! use sercom::transport::loopback;
//!
//! // An echoing modem that accepts everything.
//! let (pair, handle) = loopback::open(|line: &[u8]| {
//!     let mut reply = line.to_vec();
//!     reply.extend_from_slice(b"\r\nOK\r\n");
//!     reply
//! });
//! # drop((pair, handle));
//! ```

use super::{ChannelReader, TransportPair, TransportWriter};
use anyhow::{Result, anyhow};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Open a loopback transport driven by `responder`.
pub fn open<F>(responder: F) -> (TransportPair, LoopbackHandle)
where
    F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
{
    let (tx, rx) = channel();
    let handle = LoopbackHandle {
        tx: tx.clone(),
        written: Arc::new(Mutex::new(Vec::new())),
    };
    let writer = LoopbackWriter {
        tx: Some(tx),
        responder: Box::new(responder),
        written: handle.written.clone(),
    };
    ((Box::new(ChannelReader::new(rx)), Box::new(writer)), handle)
}

/// Side door into a loopback transport.
#[derive(Clone)]
pub struct LoopbackHandle {
    tx: Sender<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl LoopbackHandle {
    /// Deliver `data` to the reader as if the device had sent it.
    pub fn inject(&self, data: &[u8]) {
        // Fails only once the reader is gone, and then nobody is listening.
        let _ = self.tx.send(data.to_vec());
    }

    /// Everything written to the transport so far, one entry per write.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes decoded as text.
    pub fn written_lines(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

struct LoopbackWriter {
    tx: Option<Sender<Vec<u8>>>,
    responder: Responder,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TransportWriter for LoopbackWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("loopback transport closed"))?;
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
        let reply = (self.responder)(data);
        if !reply.is_empty() {
            tx.send(reply)
                .map_err(|_| anyhow!("loopback reader is gone"))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_responder_reply_reaches_reader() {
        let ((mut reader, mut writer), handle) = open(|line: &[u8]| {
            let mut reply = line.to_vec();
            reply.extend_from_slice(b"\r\nOK\r\n");
            reply
        });

        writer.write(b"AT\r").unwrap();
        let mut buf = [0u8; 64];
        let n = reader.poll_read(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"AT\r\r\nOK\r\n");
        assert_eq!(handle.written_lines(), vec!["AT\r"]);
    }

    #[test]
    fn test_inject_and_silence() {
        let ((mut reader, mut writer), handle) = open(|_: &[u8]| Vec::new());
        writer.write(b"AT\r").unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(
            reader.poll_read(&mut buf, Duration::from_millis(20)).unwrap(),
            0
        );

        handle.inject(b"\r\nRING\r\n");
        let n = reader.poll_read(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"\r\nRING\r\n");
    }

    #[test]
    fn test_write_after_close_fails() {
        let ((_reader, mut writer), _handle) = open(|_: &[u8]| Vec::new());
        writer.close().unwrap();
        assert!(writer.write(b"AT\r").is_err());
    }
}
