//! Latest sonic sensor value and the readers waiting on it.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct Inner {
    latest: Option<String>,
    waiters: VecDeque<oneshot::Sender<String>>,
}

/// Single-slot cache of the last distance reading plus a FIFO of pending reads.
#[derive(Default)]
pub(crate) struct SensorSlot {
    inner: Mutex<Inner>,
}

impl SensorSlot {
    /// Clears the slot and queues a new reader, dropping readers that gave up.
    pub(crate) fn begin_read(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        inner.latest = None;
        inner.waiters.retain(|w| !w.is_closed());
        inner.waiters.push_back(tx);
        rx
    }

    /// Stores a reply and hands it to the oldest reader still waiting.
    ///
    /// Readers that gave up (timed out or dropped) are skipped.
    pub(crate) fn publish(&self, value: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.latest = Some(value.to_string());
        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.send(value.to_string()).is_ok() {
                return true;
            }
        }
        false
    }

    /// Most recent value, if one arrived since the last read began.
    pub(crate) fn latest(&self) -> Option<String> {
        self.inner.lock().unwrap().latest.clone()
    }

    /// Number of readers still queued.
    pub(crate) fn pending(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.waiters.retain(|w| !w.is_closed());
        inner.waiters.len()
    }
}
