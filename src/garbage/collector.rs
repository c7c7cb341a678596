//! Frame-bucketed garbage collection.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use super::items::{BufferGarbage, TextureGarbage};
use crate::diagnostics::macros::gr_log;
use crate::fence::Signal;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;

/// Sealed buckets beyond which the collector warns that `end_frame` is not
/// keeping up with the GPU.
pub const DEFAULT_MAX_PENDING_BUCKETS: usize = 16;

enum Garbage {
    Texture(TextureGarbage),
    Buffer(BufferGarbage),
}

struct Bucket<S> {
    textures: Vec<TextureGarbage>,
    buffers: Vec<BufferGarbage>,
    fence: Option<S>,
}

impl<S> Bucket<S> {
    fn empty() -> Self {
        Self {
            textures: Vec::new(),
            buffers: Vec::new(),
            fence: None,
        }
    }

    fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }
}

struct CollectorState<S> {
    sealed: VecDeque<Bucket<S>>,
    free: Vec<Bucket<S>>,
    frame: u64,
    warned: bool,
}

/// Snapshot of a garbage collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GarbageStats {
    /// Items waiting for the next `end_frame`.
    pub open_items: usize,
    /// Buckets sealed with a fence that has not been observed done.
    pub sealed_buckets: usize,
    /// Items inside sealed buckets.
    pub pending_items: usize,
    /// Items released over the collector's lifetime.
    pub collected_items: u64,
}

/// Holds destroyed resources until the GPU frame that last used them is done.
///
/// Buckets move `Open -> Sealed(fence) -> Collected`. Appends go to a
/// lock-free queue and may come from any thread; sealing and collection take
/// the collector's lock. Item destructors run under that lock and must not
/// call back into the collector.
pub struct FrameGarbageCollector<S: Signal> {
    open: SegQueue<Garbage>,
    state: Mutex<CollectorState<S>>,
    collected: AtomicCounter,
    max_pending_buckets: usize,
}

impl<S: Signal> FrameGarbageCollector<S> {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_BUCKETS)
    }

    /// Collector that warns (`GR203`) once more than `max_pending_buckets`
    /// frames are waiting on the GPU.
    pub fn with_max_pending(max_pending_buckets: usize) -> Self {
        Self {
            open: SegQueue::new(),
            state: Mutex::new(CollectorState {
                sealed: VecDeque::new(),
                free: Vec::new(),
                frame: 0,
                warned: false,
            }),
            collected: AtomicCounter::new(0),
            max_pending_buckets,
        }
    }

    /// Queue a destroyed texture for release after the current frame.
    pub fn new_texture_garbage(&self, garbage: TextureGarbage) {
        self.open.push(Garbage::Texture(garbage));
    }

    /// Queue a destroyed buffer for release after the current frame.
    pub fn new_buffer_garbage(&self, garbage: BufferGarbage) {
        self.open.push(Garbage::Buffer(garbage));
    }

    /// Seal the open bucket with `fence` and collect every sealed bucket whose
    /// fence is done.
    ///
    /// Call exactly once per frame, with the fence of that frame's last
    /// submission. A frame that produced no garbage drops the fence right
    /// away. Returns the number of items released.
    pub fn end_frame(&self, fence: S) -> usize {
        let mut state = self.state.lock();
        state.frame += 1;

        let mut bucket = state.free.pop().unwrap_or_else(Bucket::empty);
        while let Some(garbage) = self.open.pop() {
            match garbage {
                Garbage::Texture(texture) => bucket.textures.push(texture),
                Garbage::Buffer(buffer) => bucket.buffers.push(buffer),
            }
        }

        if bucket.len() == 0 {
            state.free.push(bucket);
        } else {
            gr_log!(
                trace,
                "frame {}: sealed {} garbage items",
                state.frame,
                bucket.len()
            );
            bucket.fence = Some(fence);
            state.sealed.push_back(bucket);
        }

        let released = self.collect_locked(&mut state);

        if state.sealed.len() > self.max_pending_buckets {
            if !state.warned {
                state.warned = true;
                let pending = state.sealed.len();
                drop(state);
                crate::gr_warn!(
                    GR203,
                    "{} frames of garbage pending, limit {}",
                    pending,
                    self.max_pending_buckets
                );
            }
        } else {
            state.warned = false;
        }

        released
    }

    /// Same as [`end_frame`](Self::end_frame).
    pub fn set_new_frame(&self, fence: S) -> usize {
        self.end_frame(fence)
    }

    /// Collect sealed buckets whose fence is done, without sealing a new one.
    pub fn collect(&self) -> usize {
        let mut state = self.state.lock();
        self.collect_locked(&mut state)
    }

    /// Block until every sealed bucket's fence signals, then collect them.
    ///
    /// Open garbage is left alone. Fatal (`GR202`) if a fence does not signal
    /// within `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        for (i, bucket) in state.sealed.iter().enumerate() {
            if let Some(fence) = &bucket.fence {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !fence.wait(remaining) {
                    crate::gr_fatal!(
                        GR202,
                        "sealed bucket {} of {} ({} items) still pending after {:?}",
                        i + 1,
                        state.sealed.len(),
                        bucket.len(),
                        timeout
                    );
                }
            }
        }

        self.collect_locked(&mut state)
    }

    /// Snapshot of the collector.
    pub fn stats(&self) -> GarbageStats {
        let state = self.state.lock();
        GarbageStats {
            open_items: self.open.len(),
            sealed_buckets: state.sealed.len(),
            pending_items: state.sealed.iter().map(Bucket::len).sum(),
            collected_items: self.collected.get(),
        }
    }

    fn collect_locked(&self, state: &mut CollectorState<S>) -> usize {
        let mut released = 0;
        let mut i = 0;
        while i < state.sealed.len() {
            let done = state.sealed[i].fence.as_ref().map_or(true, Signal::done);
            if !done {
                i += 1;
                continue;
            }

            if let Some(mut bucket) = state.sealed.remove(i) {
                released += bucket.len();
                bucket.textures.clear();
                bucket.buffers.clear();
                bucket.fence = None;
                state.free.push(bucket);
            }
        }

        if released > 0 {
            self.collected.add(released as u64);
            gr_log!(debug, "collected {} garbage items", released);
        }
        released
    }
}

impl<S: Signal> Default for FrameGarbageCollector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Signal> Drop for FrameGarbageCollector<S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let mut state = std::mem::replace(
            self.state.get_mut(),
            CollectorState {
                sealed: VecDeque::new(),
                free: Vec::new(),
                frame: 0,
                warned: false,
            },
        );
        self.collect_locked(&mut state);

        let mut unsealed = Vec::new();
        while let Some(garbage) = self.open.pop() {
            unsealed.push(garbage);
        }

        if !state.sealed.is_empty() || !unsealed.is_empty() {
            let pending: usize = state.sealed.iter().map(Bucket::len).sum();
            let open = unsealed.len();
            // Leak the natives rather than free them under the GPU. Unsealed
            // items may belong to a frame that is still executing.
            std::mem::forget(state);
            std::mem::forget(unsealed);
            crate::gr_fatal!(
                GR201,
                "collector dropped with {} garbage items in unsignaled frames and {} never sealed to a frame",
                pending,
                open
            );
        }
    }
}

impl<S: Signal> fmt::Debug for FrameGarbageCollector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGarbageCollector")
            .field("stats", &self.stats())
            .finish()
    }
}
