//! The recycler itself.

use std::fmt;

use super::Recyclable;
use crate::diagnostics::macros::gr_log;
use crate::fence::Signal;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;

/// Recycler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclerConfig {
    /// Soft cap on cached objects. Ready objects beyond it are destroyed on
    /// recycle; pending ones cannot be and raise `GR102` instead.
    pub max_cached: usize,
    /// Requests per adjustment of the keep-alive target.
    pub adjust_window: u32,
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            max_cached: 64,
            adjust_window: 128,
        }
    }
}

/// Snapshot of a recycler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecyclerStats {
    /// Objects held by the recycler.
    pub cached: usize,
    /// Cached objects whose fence is done or absent.
    pub ready: usize,
    /// Lifetime `find_to_reuse` calls.
    pub requests: u64,
    /// Lifetime calls that found nothing ready.
    pub misses: u64,
    /// Ready objects `trim_cache` keeps alive.
    pub target_ready: usize,
}

struct RecyclerState<T> {
    objects: Vec<T>,
    window_requests: u32,
    window_misses: u32,
    /// Fewest ready objects seen at any request in the current window.
    window_min_ready: usize,
    target_ready: usize,
    warned_over_cap: bool,
}

impl<T: Recyclable> RecyclerState<T> {
    /// Drop fences that have signaled. Returns how many objects are ready.
    fn release_done_fences(&mut self) -> usize {
        let mut ready = 0;
        for object in self.objects.iter_mut() {
            let done = match object.fence() {
                Some(fence) => fence.done(),
                None => true,
            };
            if done {
                object.set_fence(None);
                ready += 1;
            }
        }
        ready
    }

    /// Destroy ready objects, newest first, while more than `keep` are ready
    /// or the cache is longer than `max_len`.
    fn destroy_ready(&mut self, mut ready: usize, keep: usize, max_len: usize) -> usize {
        let mut destroyed = 0;
        let mut i = self.objects.len();
        while i > 0 && ready > 0 && (ready > keep || self.objects.len() > max_len) {
            i -= 1;
            if self.objects[i].fence().is_none() {
                drop(self.objects.remove(i));
                ready -= 1;
                destroyed += 1;
            }
        }
        destroyed
    }

    fn adjust_target(&mut self, idle: usize, window: u32, max_cached: usize) {
        self.window_min_ready = self.window_min_ready.min(idle);
        if self.window_requests < window {
            return;
        }

        if self.window_misses > 0 {
            // Too few objects were alive to serve the window.
            self.target_ready = (self.target_ready + self.window_misses as usize).min(max_cached);
        } else {
            // Every request was served and this many were never needed.
            self.target_ready -= self.window_min_ready.min(self.target_ready);
        }

        self.window_requests = 0;
        self.window_misses = 0;
        self.window_min_ready = usize::MAX;
    }
}

/// Free list of short-lived driver objects, gated on fences.
///
/// Per-object state machine: in use, retired (fence attached), idle (fence
/// done), reused. All operations lock one internal mutex.
pub struct MicroObjectRecycler<T: Recyclable> {
    name: String,
    config: RecyclerConfig,
    state: Mutex<RecyclerState<T>>,
    requests: AtomicCounter,
    misses: AtomicCounter,
}

impl<T: Recyclable> MicroObjectRecycler<T> {
    /// Create an empty recycler.
    pub fn new(name: impl Into<String>, config: RecyclerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(RecyclerState {
                objects: Vec::new(),
                window_requests: 0,
                window_misses: 0,
                window_min_ready: usize::MAX,
                target_ready: 0,
                warned_over_cap: false,
            }),
            requests: AtomicCounter::new(0),
            misses: AtomicCounter::new(0),
        }
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pop an object whose fence has signaled (or that has none).
    ///
    /// Returns `None` when nothing is ready; the caller then creates a new
    /// native object.
    pub fn find_to_reuse(&self) -> Option<T> {
        let mut state = self.state.lock();
        let ready = state.release_done_fences();

        let found = state
            .objects
            .iter()
            .position(|object| object.fence().is_none())
            .map(|index| state.objects.remove(index));

        state.window_requests += 1;
        self.requests.increment();
        let idle = if found.is_some() {
            ready - 1
        } else {
            state.window_misses += 1;
            self.misses.increment();
            0
        };
        state.adjust_target(idle, self.config.adjust_window, self.config.max_cached);
        drop(state);

        found.map(|mut object| {
            object.on_reuse();
            object
        })
    }

    /// Take an object back, with the fence of its last GPU use attached.
    pub fn recycle(&self, object: T) {
        let mut state = self.state.lock();
        state.objects.push(object);

        let max = self.config.max_cached;
        if state.objects.len() <= max {
            state.warned_over_cap = false;
            return;
        }

        let ready = state.release_done_fences();
        state.destroy_ready(ready, usize::MAX, max);

        if state.objects.len() > max && !state.warned_over_cap {
            state.warned_over_cap = true;
            let cached = state.objects.len();
            drop(state);
            crate::gr_warn!(GR102, "recycler '{}': {} cached, cap {}", self.name, cached, max);
        }
    }

    /// Re-check fences and destroy idle objects beyond the keep-alive target.
    ///
    /// Returns how many objects were destroyed.
    pub fn trim_cache(&self) -> usize {
        let mut state = self.state.lock();
        let ready = state.release_done_fences();
        let target = state.target_ready;
        let destroyed = state.destroy_ready(ready, target, usize::MAX);
        if destroyed > 0 {
            gr_log!(
                trace,
                "recycler '{}' trimmed {} objects, keeping {} ready",
                self.name,
                destroyed,
                target
            );
        }
        destroyed
    }

    /// Destroy the recycler and everything it holds.
    ///
    /// Fatal (`GR101`) if any object's fence is still pending.
    pub fn destroy(self) {
        drop(self);
    }

    /// Snapshot of the recycler.
    pub fn stats(&self) -> RecyclerStats {
        let mut state = self.state.lock();
        let ready = state.release_done_fences();
        RecyclerStats {
            cached: state.objects.len(),
            ready,
            requests: self.requests.get(),
            misses: self.misses.get(),
            target_ready: state.target_ready,
        }
    }
}

impl<T: Recyclable> Drop for MicroObjectRecycler<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let state = self.state.get_mut();
        let pending = state
            .objects
            .iter()
            .filter(|object| object.fence().map_or(false, |fence| !fence.done()))
            .count();
        if pending > 0 {
            crate::gr_fatal!(
                GR101,
                "recycler '{}': {} of {} objects still pending",
                self.name,
                pending,
                state.objects.len()
            );
        }
        state.objects.clear();
    }
}

impl<T: Recyclable> fmt::Debug for MicroObjectRecycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroObjectRecycler")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
