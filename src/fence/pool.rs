//! Bounded fence pool.
//!
//! Native fences live in an arena owned by the pool and are addressed by
//! index. A [`Fence`] handle stores that index plus a back-reference to the
//! pool's shared state; cloning retains, dropping releases, and the last
//! release returns the index to the idle list. Native objects are only
//! destroyed when the pool itself is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Signal;
use crate::diagnostics::macros::gr_log;
use crate::gpu::traits::FenceBackend;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::{Condvar, Mutex};

/// Longest single wait on an idle fence while the pool is at its cap.
/// Short so that a concurrent release is noticed promptly.
const POLL_SLICE: Duration = Duration::from_millis(1);

struct FenceSlot<N> {
    native: N,
    /// First observed `true` is cached here; cleared only on reuse.
    signaled: AtomicBool,
}

struct PoolState<N> {
    slots: Vec<Arc<FenceSlot<N>>>,
    /// Released slots, oldest first.
    idle: VecDeque<u32>,
    referenced: usize,
}

struct PoolShared<B: FenceBackend> {
    backend: Arc<B>,
    cap: usize,
    wait_timeout: Duration,
    state: Mutex<PoolState<B::Native>>,
    released: Condvar,
    waits: AtomicCounter,
    #[cfg(feature = "debug")]
    traces: crate::debug::backtrace::BacktraceTracker,
}

impl<B: FenceBackend> PoolShared<B> {
    fn query(&self, slot: &FenceSlot<B::Native>) -> bool {
        if slot.signaled.load(Ordering::Acquire) {
            return true;
        }
        match self.backend.fence_status(slot.native) {
            Ok(true) => {
                slot.signaled.store(true, Ordering::Release);
                true
            }
            Ok(false) => false,
            Err(err) => crate::gr_fatal!(GR004, "status of fence {:?}: {}", slot.native, err),
        }
    }

    fn wait(&self, slot: &FenceSlot<B::Native>, timeout: Duration) -> bool {
        if self.query(slot) {
            return true;
        }
        match self.backend.wait_fence(slot.native, timeout) {
            Ok(true) => {
                slot.signaled.store(true, Ordering::Release);
                true
            }
            Ok(false) => false,
            Err(err) => crate::gr_fatal!(GR004, "wait on fence {:?}: {}", slot.native, err),
        }
    }

    fn release(&self, index: u32) {
        let mut state = self.state.lock();
        state.referenced -= 1;
        state.idle.push_back(index);
        drop(state);

        #[cfg(feature = "debug")]
        self.traces.forget(index);

        self.released.notify_one();
    }
}

/// Snapshot of a fence pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FencePoolStats {
    /// Native fences created so far (never exceeds the cap).
    pub created: usize,
    /// Fences with at least one live handle.
    pub referenced: usize,
    /// Released fences waiting for reuse.
    pub idle: usize,
    /// Times an acquire had to block at the cap.
    pub waits: u64,
}

/// Bounded pool of native fences.
///
/// The cap bounds OS resource usage (fences are file descriptors on some
/// platforms). When every fence is in use, [`FencePool::acquire`] blocks.
pub struct FencePool<B: FenceBackend> {
    shared: Arc<PoolShared<B>>,
}

impl<B: FenceBackend> FencePool<B> {
    /// Create a pool that will hold at most `cap` native fences.
    ///
    /// `wait_timeout` bounds how long an acquire may block at the cap before
    /// the pool declares a leak.
    pub fn new(backend: Arc<B>, cap: usize, wait_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                backend,
                cap: cap.max(1),
                wait_timeout,
                state: Mutex::new(PoolState {
                    slots: Vec::with_capacity(cap.max(1)),
                    idle: VecDeque::new(),
                    referenced: 0,
                }),
                released: Condvar::new(),
                waits: AtomicCounter::new(0),
                #[cfg(feature = "debug")]
                traces: crate::debug::backtrace::BacktraceTracker::new(),
            }),
        }
    }

    /// The backend fences are created on.
    pub fn backend(&self) -> &Arc<B> {
        &self.shared.backend
    }

    /// Maximum number of native fences.
    pub fn cap(&self) -> usize {
        self.shared.cap
    }

    /// Get a fresh, unsignaled fence with a reference count of one.
    ///
    /// Prefers a released fence the GPU has already passed, then creates a
    /// new one if under the cap, and otherwise blocks until one frees up.
    pub fn acquire(&self) -> Fence<B> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.wait_timeout;
        let mut state = shared.state.lock();
        let mut waited = false;

        loop {
            let reusable = {
                let st = &*state;
                st.idle
                    .iter()
                    .position(|&index| shared.query(&st.slots[index as usize]))
            };

            if let Some(position) = reusable {
                let index = match state.idle.remove(position) {
                    Some(index) => index,
                    None => unreachable!("idle position came from the same locked list"),
                };
                let slot = state.slots[index as usize].clone();
                if let Err(err) = shared.backend.reset_fence(slot.native) {
                    crate::gr_fatal!(GR004, "reset of fence {:?}: {}", slot.native, err);
                }
                slot.signaled.store(false, Ordering::Release);
                state.referenced += 1;
                drop(state);
                return self.hand_out(index, slot);
            }

            if state.slots.len() < shared.cap {
                let native = match shared.backend.create_fence() {
                    Ok(native) => native,
                    Err(err) => crate::gr_fatal!(
                        GR002,
                        "fence {} of cap {}: {}",
                        state.slots.len() + 1,
                        shared.cap,
                        err
                    ),
                };
                let index = state.slots.len() as u32;
                let slot = Arc::new(FenceSlot {
                    native,
                    signaled: AtomicBool::new(false),
                });
                state.slots.push(slot.clone());
                state.referenced += 1;
                gr_log!(debug, "fence pool grew to {} of {}", state.slots.len(), shared.cap);
                drop(state);
                return self.hand_out(index, slot);
            }

            if !waited {
                waited = true;
                shared.waits.increment();
            }
            let now = Instant::now();
            if now >= deadline {
                crate::gr_fatal!(
                    GR001,
                    "cap {} reached with {} referenced and {} idle-but-pending after {:?}",
                    shared.cap,
                    state.referenced,
                    state.idle.len(),
                    shared.wait_timeout
                );
            }
            let remaining = deadline - now;

            let oldest = state
                .idle
                .front()
                .map(|&index| state.slots[index as usize].clone());
            match oldest {
                Some(slot) => {
                    drop(state);
                    // Raw backend wait: the slot may be handed out and reset
                    // meanwhile, so only the locked re-scan above decides.
                    let _ = shared.backend.wait_fence(slot.native, remaining.min(POLL_SLICE));
                    state = shared.state.lock();
                }
                None => {
                    shared.released.wait_for(&mut state, remaining);
                }
            }
        }
    }

    fn hand_out(&self, index: u32, slot: Arc<FenceSlot<B::Native>>) -> Fence<B> {
        #[cfg(feature = "debug")]
        self.shared.traces.record(index);

        Fence(Arc::new(FenceInner {
            pool: self.shared.clone(),
            index,
            slot,
        }))
    }

    /// Snapshot of the pool.
    pub fn stats(&self) -> FencePoolStats {
        let state = self.shared.state.lock();
        FencePoolStats {
            created: state.slots.len(),
            referenced: state.referenced,
            idle: state.idle.len(),
            waits: self.shared.waits.get(),
        }
    }
}

impl<B: FenceBackend> Drop for FencePool<B> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let state = self.shared.state.lock();
        if state.referenced != 0 {
            let created = state.slots.len();
            let referenced = state.referenced;
            drop(state);

            #[cfg(feature = "debug")]
            let sites = self.shared.traces.report();
            #[cfg(not(feature = "debug"))]
            let sites = String::from("enable the `debug` feature to see acquire sites");

            crate::gr_fatal!(GR003, "{} of {} fences referenced; {}", referenced, created, sites);
        }

        for slot in state.slots.iter() {
            self.shared.backend.destroy_fence(slot.native);
        }
        gr_log!(debug, "fence pool destroyed {} native fences", state.slots.len());
    }
}

impl<B: FenceBackend> fmt::Debug for FencePool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FencePool")
            .field("cap", &self.shared.cap)
            .field("stats", &self.stats())
            .finish()
    }
}

struct FenceInner<B: FenceBackend> {
    pool: Arc<PoolShared<B>>,
    index: u32,
    slot: Arc<FenceSlot<B::Native>>,
}

impl<B: FenceBackend> Drop for FenceInner<B> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Reference-counted handle to a pooled fence.
///
/// Clone to retain, drop to release. The fence goes back to its pool when
/// the last handle is dropped.
pub struct Fence<B: FenceBackend>(Arc<FenceInner<B>>);

impl<B: FenceBackend> Fence<B> {
    /// Native handle, for queue submission.
    pub fn native(&self) -> B::Native {
        self.0.slot.native
    }

    /// Slot index inside the owning pool.
    pub fn index(&self) -> u32 {
        self.0.index
    }

    /// Number of live handles to this fence.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles refer to the same acquisition.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<B: FenceBackend> Signal for Fence<B> {
    fn done(&self) -> bool {
        self.0.pool.query(&self.0.slot)
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.0.pool.wait(&self.0.slot, timeout)
    }
}

impl<B: FenceBackend> Clone for Fence<B> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<B: FenceBackend> fmt::Debug for Fence<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("index", &self.0.index)
            .field("native", &self.0.slot.native)
            .field("signaled", &self.0.slot.signaled.load(Ordering::Relaxed))
            .finish()
    }
}
