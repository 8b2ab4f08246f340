//! Background thread that drains the transport into the receive buffer.

use crate::alive::AliveFlag;
use crate::rx_buffer::RxBuffer;
use crate::transport::TransportReader;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

const CHUNK_SIZE: usize = 4096;

/// Handle to the running stream reader.
pub struct StreamReader {
    handle: JoinHandle<()>,
}

impl StreamReader {
    /// Start draining `reader` into `rx`.
    ///
    /// Each transport wait is bounded by `wait`, and the alive flag is checked
    /// between waits, so the thread stops within roughly `wait` of the flag
    /// being cleared. A transport error also stops the thread and clears the
    /// flag, since nothing more will ever arrive.
    pub fn spawn(
        mut reader: Box<dyn TransportReader>,
        rx: RxBuffer,
        alive: AliveFlag,
        wait: Duration,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("sercom-rx".into())
            .spawn(move || {
                let mut chunk = [0u8; CHUNK_SIZE];
                while alive.is_alive() {
                    match reader.poll_read(&mut chunk, wait) {
                        Ok(0) => continue,
                        Ok(n) => {
                            trace!(bytes = n, "received chunk");
                            rx.append(&chunk[..n]);
                        }
                        Err(e) => {
                            error!("stream reader stopped: {e:#}");
                            alive.clear();
                            break;
                        }
                    }
                }
                debug!("stream reader exited");
            })?;
        Ok(Self { handle })
    }

    /// Wait for the thread to finish. Clear the alive flag first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("stream reader panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;

    #[test]
    fn test_reader_appends_and_stops() {
        let ((reader, _writer), handle) = loopback::open(|_: &[u8]| Vec::new());
        let rx = RxBuffer::new();
        let alive = AliveFlag::new();
        let stream = StreamReader::spawn(reader, rx.clone(), alive.clone(), Duration::from_millis(10))
            .unwrap();

        handle.inject(b"AT\r\r\n");
        handle.inject(b"OK\r\n");
        for _ in 0..100 {
            if rx.len() == 9 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rx.snapshot(), b"AT\r\r\nOK\r\n");

        alive.clear();
        stream.join();
    }

    #[test]
    fn test_transport_error_clears_alive() {
        let ((reader, writer), handle) = loopback::open(|_: &[u8]| Vec::new());
        drop(writer);
        drop(handle);
        let alive = AliveFlag::new();
        let stream =
            StreamReader::spawn(reader, RxBuffer::new(), alive.clone(), Duration::from_millis(10))
                .unwrap();
        stream.join();
        assert!(!alive.is_alive());
    }
}
