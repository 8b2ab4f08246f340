//! Process-wide "keep running" flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    alive: AtomicBool,
    notify: Notify,
}

/// Cleared once to stop the stream reader and the command task.
///
/// The reader thread polls [`AliveFlag::is_alive`] between bounded waits.
/// Async code can await [`AliveFlag::cleared`] instead.
#[derive(Debug, Clone)]
pub struct AliveFlag {
    inner: Arc<Inner>,
}

impl Default for AliveFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AliveFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                alive: AtomicBool::new(true),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Clear the flag and wake everything waiting in [`cleared`](Self::cleared).
    pub fn clear(&self) {
        self.inner.alive.store(false, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once the flag has been cleared.
    pub async fn cleared(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if !self.is_alive() {
                return;
            }
            notified.await;
        }
    }
}
