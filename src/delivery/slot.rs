//! Single-slot, latest-frame-wins channel.

use crate::normalize::DisplayFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned when waiting for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("no frame delivered within the timeout")]
    Timeout,
    #[error("frame sender dropped")]
    Disconnected,
}

#[derive(Default)]
struct Pending {
    frame: Option<DisplayFrame>,
    closed: bool,
}

#[derive(Default)]
struct Slot {
    pending: Mutex<Pending>,
    ready: Condvar,
    delivered: AtomicU64,
    overwritten: AtomicU64,
    latest_sequence: AtomicU64,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Creates a connected sender/receiver pair.
pub fn channel() -> (FrameSender, FrameReceiver) {
    let slot = Arc::new(Slot::default());
    (
        FrameSender {
            slot: Arc::clone(&slot),
        },
        FrameReceiver { slot },
    )
}

/// Producer half. Owned by whichever component is acquiring.
pub struct FrameSender {
    slot: Arc<Slot>,
}

impl FrameSender {
    /// Publishes a frame, replacing any frame not yet taken.
    ///
    /// Returns true if an undelivered frame was overwritten.
    pub fn deliver(&self, frame: DisplayFrame) -> bool {
        let sequence = frame.sequence();
        let replaced = {
            let mut pending = self.slot.lock();
            pending.frame.replace(frame).is_some()
        };
        self.slot.ready.notify_one();

        self.slot.delivered.fetch_add(1, Ordering::Relaxed);
        self.slot.latest_sequence.store(sequence, Ordering::Relaxed);
        if replaced {
            self.slot.overwritten.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(sequence, "Overwrote undelivered frame");
        }
        replaced
    }

    /// Returns true while the receiver is alive.
    pub fn has_receiver(&self) -> bool {
        Arc::strong_count(&self.slot) > 1
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.slot.lock().closed = true;
        self.slot.ready.notify_all();
    }
}

/// Consumer half.
pub struct FrameReceiver {
    slot: Arc<Slot>,
}

impl FrameReceiver {
    /// Takes the pending frame, if any, without blocking.
    pub fn try_take(&self) -> Option<DisplayFrame> {
        self.slot.lock().frame.take()
    }

    /// Waits up to `timeout` for a frame.
    ///
    /// A frame already pending is returned even if the sender is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<DisplayFrame, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.slot.lock();
        loop {
            if let Some(frame) = pending.frame.take() {
                return Ok(frame);
            }
            if pending.closed {
                return Err(RecvError::Disconnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RecvError::Timeout);
            }
            pending = self
                .slot
                .ready
                .wait_timeout(pending, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Total frames published by the sender.
    pub fn delivered_count(&self) -> u64 {
        self.slot.delivered.load(Ordering::Relaxed)
    }

    /// Frames replaced before the consumer took them.
    pub fn overwritten_count(&self) -> u64 {
        self.slot.overwritten.load(Ordering::Relaxed)
    }

    /// Sequence number of the most recently published frame (0 if none).
    pub fn latest_sequence(&self) -> u64 {
        self.slot.latest_sequence.load(Ordering::Relaxed)
    }

    /// Returns true while the sender is alive.
    pub fn is_connected(&self) -> bool {
        !self.slot.lock().closed
    }
}
