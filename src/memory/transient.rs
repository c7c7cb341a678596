//! Frame-scoped transient memory.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::stack::{StackAllocation, StackGpuMemoryPool, StackPoolDesc};
use super::stats::StackStats;
use crate::fence::Signal;
use crate::gpu::MemoryBackend;
use crate::sync::mutex::Mutex;

/// Ring of stack pools, one per frame in flight.
///
/// Each slot is guarded by the fence of the last frame that wrote into it.
/// [`end_frame`](Self::end_frame) attaches that fence, moves to the next slot
/// and waits for the slot's previous fence before resetting it, so the CPU
/// never overwrites scratch data the GPU may still read.
pub struct TransientMemoryPool<B: MemoryBackend, S: Signal> {
    slots: Box<[StackGpuMemoryPool<B>]>,
    fences: Mutex<Vec<Option<S>>>,
    current: AtomicUsize,
    wait_timeout: Duration,
}

impl<B: MemoryBackend, S: Signal> TransientMemoryPool<B, S> {
    /// `frames_in_flight` slots built from `desc`, each named `<name>[i]`.
    pub fn new(
        backend: Arc<B>,
        desc: StackPoolDesc,
        frames_in_flight: usize,
        wait_timeout: Duration,
    ) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        let slots = (0..frames_in_flight)
            .map(|i| {
                let mut slot_desc = desc.clone();
                slot_desc.name = format!("{}[{}]", desc.name, i);
                StackGpuMemoryPool::new(backend.clone(), slot_desc)
            })
            .collect();

        Self {
            slots,
            fences: Mutex::new((0..frames_in_flight).map(|_| None).collect()),
            current: AtomicUsize::new(0),
            wait_timeout,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the current frame allocates from.
    pub fn current_slot(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Scratch memory valid until this frame's fence signals.
    pub fn allocate(&self, size: u64, alignment: u64) -> StackAllocation<B::Block> {
        self.slots[self.current_slot()].allocate(size, alignment)
    }

    /// Close the current frame with `fence` and open the next slot.
    ///
    /// Blocks until the next slot's previous frame is done; fatal (`GR403`)
    /// after the configured timeout.
    pub fn end_frame(&self, fence: S) {
        let mut fences = self.fences.lock();
        let current = self.current.load(Ordering::Acquire);
        fences[current] = Some(fence);

        let next = (current + 1) % self.slots.len();
        if let Some(previous) = fences[next].take() {
            if !previous.wait(self.wait_timeout) {
                crate::gr_fatal!(
                    GR403,
                    "transient slot {} not retired after {:?}",
                    next,
                    self.wait_timeout
                );
            }
        }

        self.slots[next].end_frame();
        self.current.store(next, Ordering::Release);
    }

    /// Wait for every slot's fence and reset all slots.
    pub fn wait_idle(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut fences = self.fences.lock();
        for (slot, fence) in fences.iter_mut().enumerate() {
            if let Some(fence) = fence.take() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !fence.wait(remaining) {
                    crate::gr_fatal!(
                        GR403,
                        "transient slot {} not retired after {:?}",
                        slot,
                        timeout
                    );
                }
            }
        }
        for slot in self.slots.iter() {
            slot.end_frame();
        }
    }

    /// All slots combined.
    pub fn stats(&self) -> StackStats {
        let mut stats = StackStats::default();
        for slot in self.slots.iter() {
            stats.merge(&slot.stats());
        }
        stats
    }
}

impl<B: MemoryBackend, S: Signal> Drop for TransientMemoryPool<B, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let pending = self
            .fences
            .get_mut()
            .iter()
            .position(|fence| fence.as_ref().map_or(false, |fence| !fence.done()));
        if let Some(slot) = pending {
            crate::gr_fatal!(GR402, "transient slot {} dropped while its frame is pending", slot);
        }
    }
}

impl<B: MemoryBackend, S: Signal> fmt::Debug for TransientMemoryPool<B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientMemoryPool")
            .field("frames_in_flight", &self.slots.len())
            .field("current", &self.current_slot())
            .field("stats", &self.stats())
            .finish()
    }
}
