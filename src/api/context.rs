//! The per-device resource context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ResourceConfig;
use crate::diagnostics::macros::gr_log;
use crate::diagnostics::tracy::{MemoryEvent, ProfilerHooks};
use crate::fence::{Fence, FencePool};
use crate::garbage::{BufferGarbage, FrameGarbageCollector, TextureGarbage};
use crate::gpu::{FenceBackend, MemoryBackend};
use crate::memory::{GpuMemoryManager, MemoryLease, MemoryStats, MemoryUsage, StackAllocation};
use crate::recycler::{MicroObjectRecycler, Recyclable, RecyclerConfig};

/// Everything that tracks GPU lifetimes for one device.
///
/// Build it once at device creation and pass it to whatever allocates.
/// Fields are dropped garbage first, then memory, then fences: garbage may
/// hold memory leases and fences, and memory holds fences.
pub struct GpuResourceContext<B: FenceBackend + MemoryBackend> {
    garbage: FrameGarbageCollector<Fence<B>>,
    memory: GpuMemoryManager<B, Fence<B>>,
    fences: Arc<FencePool<B>>,
    config: ResourceConfig,
    frame: AtomicU64,
    profiler: ProfilerHooks,
}

impl<B: FenceBackend + MemoryBackend> GpuResourceContext<B> {
    pub fn new(backend: Arc<B>, config: ResourceConfig) -> Self {
        let fences = Arc::new(FencePool::new(
            backend.clone(),
            config.fence_pool_cap,
            config.fence_wait_timeout,
        ));
        let memory = GpuMemoryManager::new(backend, &config);
        let garbage = FrameGarbageCollector::with_max_pending(config.max_pending_garbage_frames);

        gr_log!(
            debug,
            "resource context: {} fences, {} frames in flight",
            config.fence_pool_cap,
            config.frames_in_flight
        );

        Self {
            garbage,
            memory,
            fences,
            config,
            frame: AtomicU64::new(0),
            profiler: ProfilerHooks::new(),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn fence_pool(&self) -> &Arc<FencePool<B>> {
        &self.fences
    }

    pub fn garbage(&self) -> &FrameGarbageCollector<Fence<B>> {
        &self.garbage
    }

    pub fn memory(&self) -> &GpuMemoryManager<B, Fence<B>> {
        &self.memory
    }

    /// Frames ended so far.
    pub fn frame_number(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Receive [`MemoryEvent`]s from `end_frame` and fence waits.
    pub fn set_profiler_callback<F>(&mut self, callback: F)
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.profiler.set_callback(callback);
    }

    /// A fresh fence for a submission. Blocks if the pool is at its cap.
    pub fn new_fence(&self) -> Fence<B> {
        let waits_before = self.fences.stats().waits;
        let start = Instant::now();
        let fence = self.fences.acquire();
        if self.fences.stats().waits > waits_before {
            self.profiler.emit(MemoryEvent::FenceWait {
                micros: start.elapsed().as_micros() as u64,
            });
        }
        fence
    }

    /// A recycler tuned by this context's configuration.
    pub fn new_recycler<T: Recyclable>(&self, name: &str) -> Arc<MicroObjectRecycler<T>> {
        Arc::new(MicroObjectRecycler::new(
            name,
            RecyclerConfig {
                max_cached: self.config.recycler_max_cached,
                adjust_window: self.config.recycler_adjust_window,
            },
        ))
    }

    /// Long-lived buffer memory, freed when the lease drops.
    pub fn allocate(&self, usage: MemoryUsage, size: u64, alignment: u64) -> MemoryLease<B> {
        self.memory.allocate(usage, size, alignment)
    }

    /// Scratch memory valid for the current frame.
    pub fn allocate_transient(&self, size: u64, alignment: u64) -> StackAllocation<B::Block> {
        self.memory.allocate_transient(size, alignment)
    }

    pub fn new_texture_garbage(&self, garbage: TextureGarbage) {
        self.garbage.new_texture_garbage(garbage);
    }

    pub fn new_buffer_garbage(&self, garbage: BufferGarbage) {
        self.garbage.new_buffer_garbage(garbage);
    }

    /// Close the frame whose last submission signals `fence`.
    ///
    /// Seals this frame's garbage, collects older frames that are done and
    /// rotates transient memory. Call exactly once per frame. Returns the
    /// number of garbage items released.
    pub fn end_frame(&self, fence: Fence<B>) -> usize {
        let released = self.garbage.end_frame(fence.clone());
        self.memory.end_frame(fence);
        let frame_number = self.frame.fetch_add(1, Ordering::Relaxed) + 1;

        self.profiler.emit(MemoryEvent::FrameMark { frame_number });
        let garbage = self.garbage.stats();
        self.profiler.emit(MemoryEvent::PendingGarbage {
            items: garbage.pending_items,
        });
        for (name, stats) in self.memory.stats().pools {
            self.profiler.emit(MemoryEvent::PoolUsage {
                name,
                used_bytes: stats.used_bytes,
                total_bytes: stats.total_bytes,
            });
        }

        released
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Wait for the GPU to finish every tracked frame, then tear down.
    ///
    /// `fence` seals garbage queued since the last `end_frame`; pass the
    /// fence of the last submission that may still use it. Fatal if a fence
    /// does not signal within `timeout`, or if fence handles are still held
    /// elsewhere.
    pub fn shutdown(self, fence: Fence<B>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        self.garbage.end_frame(fence);
        self.garbage.wait_idle(timeout);
        self.memory
            .wait_idle(deadline.saturating_duration_since(Instant::now()));
        gr_log!(
            debug,
            "resource context shut down after {} frames",
            self.frame_number()
        );
    }
}

impl<B: FenceBackend + MemoryBackend> fmt::Debug for GpuResourceContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResourceContext")
            .field("frame", &self.frame_number())
            .field("fences", &self.fences.stats())
            .field("garbage", &self.garbage.stats())
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostBackend;
    use crate::util::size::kb;
    use std::sync::atomic::AtomicUsize;

    fn context() -> (Arc<HostBackend>, GpuResourceContext<HostBackend>) {
        let backend = HostBackend::shared();
        let context = GpuResourceContext::new(backend.clone(), ResourceConfig::minimal());
        (backend, context)
    }

    #[test]
    fn test_frame_loop() {
        let (backend, context) = context();
        let released = Arc::new(AtomicUsize::new(0));

        for frame in 0..6 {
            // The GPU finishes each frame while the CPU records the next one.
            if frame > 0 {
                backend.signal_all();
            }

            let fence = context.new_fence();
            let lease = context.allocate(MemoryUsage::Geometry, kb(2), 256);
            let _ = context.allocate_transient(256, 256);

            let counter = released.clone();
            context.new_buffer_garbage(
                BufferGarbage::new()
                    .with_buffer(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .with_memory(lease),
            );
            context.end_frame(fence);
        }

        assert_eq!(context.frame_number(), 6);
        assert_eq!(released.load(Ordering::Relaxed), 5);
        backend.signal_all();
        let last = context.new_fence();
        backend.signal(last.native());
        context.shutdown(last, Duration::from_millis(50));

        assert_eq!(released.load(Ordering::Relaxed), 6);
        assert_eq!(backend.live_blocks(), 0);
        assert_eq!(backend.live_fences(), 0);
    }

    #[test]
    fn test_profiler_sees_frames() {
        let (backend, mut context) = context();
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        context.set_profiler_callback(move |event| {
            if let MemoryEvent::FrameMark { .. } = event {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        for _ in 0..3 {
            let fence = context.new_fence();
            backend.signal(fence.native());
            context.end_frame(fence);
        }
        assert_eq!(frames.load(Ordering::Relaxed), 3);
        let last = context.new_fence();
        backend.signal(last.native());
        context.shutdown(last, Duration::from_millis(50));
    }

    #[test]
    fn test_shutdown_seals_late_garbage_with_final_fence() {
        use std::sync::atomic::AtomicBool;

        let (backend, context) = context();
        let fence = context.new_fence();
        backend.signal(fence.native());
        context.end_frame(fence);

        // Destroyed after the last frame, still read by the final submission.
        let gpu_done = Arc::new(AtomicBool::new(false));
        let freed_after_gpu = Arc::new(AtomicBool::new(false));
        let (done, freed) = (gpu_done.clone(), freed_after_gpu.clone());
        context.new_buffer_garbage(BufferGarbage::new().with_buffer(move || {
            freed.store(done.load(Ordering::Acquire), Ordering::Release);
        }));

        let last = context.new_fence();
        let native = last.native();
        let signaller = {
            let backend = backend.clone();
            let gpu_done = gpu_done.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                gpu_done.store(true, Ordering::Release);
                backend.signal(native);
            })
        };

        context.shutdown(last, Duration::from_secs(5));
        signaller.join().expect("Thread panicked");

        assert!(freed_after_gpu.load(Ordering::Acquire));
        assert_eq!(backend.live_fences(), 0);
    }

    #[test]
    #[should_panic(expected = "GR202")]
    fn test_shutdown_with_unsignaled_frame() {
        let (_backend, context) = context();
        context.new_texture_garbage(TextureGarbage::new());
        context.end_frame(context.new_fence());
        let last = context.new_fence();
        context.shutdown(last, Duration::from_millis(5));
    }
}
