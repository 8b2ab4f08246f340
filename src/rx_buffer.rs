//! The receive buffer shared by the stream reader and the session.
//!
//! The reader thread is the only caller of [`RxBuffer::append`]; the session
//! is the only caller of [`RxBuffer::take_response`]. Both go through the same
//! mutex, so a span is framed and removed in one step and partial data is
//! never dropped.

use crate::framer::{self, Frame, ResponseFramer};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    received: u64,
}

/// Cloneable handle to the shared receive buffer.
#[derive(Debug, Clone, Default)]
pub struct RxBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic elsewhere must not make received data unreachable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk read from the transport.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.data.extend_from_slice(chunk);
        inner.received += chunk.len() as u64;
    }

    /// Total number of bytes ever appended. Grows whenever new data arrives,
    /// regardless of removals.
    pub fn received(&self) -> u64 {
        self.lock().received
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Frame a response and, if it is complete, remove it together with
    /// everything ahead of it.
    ///
    /// Framing starts at the first `anchor` (the command echo) found at or
    /// after offset `from`, or at `from` itself when there is no echo. Bytes
    /// before that point belong to no command and come back as
    /// [`Taken::stray`].
    pub fn take_response(
        &self,
        framer: &ResponseFramer,
        from: usize,
        anchor: &[u8],
    ) -> Option<Taken> {
        let mut inner = self.lock();
        let from = from.min(inner.data.len());
        let start = framer::find(&inner.data[from..], anchor).map_or(from, |pos| from + pos);
        match framer.frame(&inner.data[start..]) {
            Frame::Complete { end, .. } => {
                let mut stray: Vec<u8> = inner.data.drain(..start + end).collect();
                let response = stray.split_off(start);
                Some(Taken { stray, response })
            }
            Frame::Incomplete => None,
        }
    }
}

/// A response removed from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taken {
    /// Data that arrived ahead of the response, such as a late reply to an
    /// earlier command.
    pub stray: Vec<u8>,
    pub response: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::Sentry;

    #[test]
    fn test_take_response_removes_only_the_response() {
        let rx = RxBuffer::new();
        let framer = ResponseFramer::new(vec![Sentry::plain("\r\nOK\r\n")]);

        rx.append(b"AT\r\r\nOK\r\n+CREG: 1");
        let taken = rx.take_response(&framer, 0, b"AT").unwrap();
        assert!(taken.stray.is_empty());
        assert_eq!(taken.response, b"AT\r\r\nOK\r\n");
        assert_eq!(rx.snapshot(), b"+CREG: 1");
    }

    #[test]
    fn test_framing_starts_at_the_echo() {
        let rx = RxBuffer::new();
        let framer = ResponseFramer::new(vec![Sentry::plain("\r\nOK\r\n")]);

        rx.append(b"AT+SLOW\r\r\n+SLOW: 1\r\n\r\nOK\r\n");
        let before = rx.len();
        assert!(rx.take_response(&framer, before, b"ATI").is_none());
        assert_eq!(rx.len(), before);

        rx.append(b"ATI\r\r\nQuectel\r\n\r\nOK\r\n");
        let taken = rx.take_response(&framer, before, b"ATI").unwrap();
        assert_eq!(taken.stray, b"AT+SLOW\r\r\n+SLOW: 1\r\n\r\nOK\r\n");
        assert_eq!(taken.response, b"ATI\r\r\nQuectel\r\n\r\nOK\r\n");
        assert!(rx.is_empty());
    }

    #[test]
    fn test_without_echo_framing_starts_at_offset() {
        let rx = RxBuffer::new();
        let framer = ResponseFramer::new(vec![Sentry::plain("\r\nOK\r\n")]);

        rx.append(b"\r\nRING\r\n");
        rx.append(b"\r\nOK\r\n");
        let taken = rx.take_response(&framer, 8, b"ATA").unwrap();
        assert_eq!(taken.stray, b"\r\nRING\r\n");
        assert_eq!(taken.response, b"\r\nOK\r\n");
    }

    #[test]
    fn test_incomplete_leaves_buffer_untouched() {
        let rx = RxBuffer::new();
        let framer = ResponseFramer::new(vec![Sentry::plain("\r\nOK\r\n")]);

        rx.append(b"AT\r\r\n");
        assert!(rx.take_response(&framer, 0, b"AT").is_none());
        assert_eq!(rx.snapshot(), b"AT\r\r\n");
    }

    #[test]
    fn test_received_counts_appends_not_contents() {
        let rx = RxBuffer::new();
        let framer = ResponseFramer::new(vec![Sentry::plain("OK")]);
        rx.append(b"OK");
        rx.append(b"");
        rx.take_response(&framer, 0, b"");
        assert!(rx.is_empty());
        assert_eq!(rx.received(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let rx = RxBuffer::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        rx.append(b"ab");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(rx.len(), 800);
    }
}
