//! Scripted fences for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use super::Signal;

/// Fence the test flips by hand.
#[derive(Default)]
pub(crate) struct ManualFence(AtomicBool);

impl ManualFence {
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Signal for ManualFence {
    fn done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn wait(&self, _timeout: Duration) -> bool {
        self.done()
    }
}

/// Fence that reports done from its `signal_at`-th poll on.
pub(crate) struct PollFence {
    pub polls: AtomicU32,
    pub signal_at: u32,
}

impl PollFence {
    pub fn new(signal_at: u32) -> Self {
        Self {
            polls: AtomicU32::new(0),
            signal_at,
        }
    }
}

impl Signal for PollFence {
    fn done(&self) -> bool {
        self.polls.fetch_add(1, Ordering::Relaxed) + 1 >= self.signal_at
    }

    fn wait(&self, _timeout: Duration) -> bool {
        self.polls.store(self.signal_at, Ordering::Relaxed);
        true
    }
}

/// Fence for GPU work that never completes.
pub(crate) struct NeverFence;

impl Signal for NeverFence {
    fn done(&self) -> bool {
        false
    }

    fn wait(&self, _timeout: Duration) -> bool {
        false
    }
}
