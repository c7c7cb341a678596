//! Integration tests for fencealloc.

use fencealloc::diagnostics::{set_thread_sink, CollectingSink};
use fencealloc::gpu::HostFence;
use fencealloc::{
    BindlessIndexAllocator, BufferGarbage, BufferUsage, Fence, FencePool, FrameGarbageCollector,
    GpuResourceContext, HostBackend, MemoryUsage, MicroObjectRecycler, Recyclable,
    RecyclerConfig, ResourceConfig, SegregatedListsGpuMemoryPool, SegregatedPoolDesc,
    TextureGarbage,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn context(config: ResourceConfig) -> (Arc<HostBackend>, GpuResourceContext<HostBackend>) {
    let backend = HostBackend::shared();
    let context = GpuResourceContext::new(backend.clone(), config);
    (backend, context)
}

fn counting_release(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
    let counter = counter.clone();
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// A query pool stand-in: the native handle is an id.
struct QueryPool {
    id: u32,
    fence: Option<Fence<HostBackend>>,
    reuses: u32,
}

impl Recyclable for QueryPool {
    type Fence = Fence<HostBackend>;

    fn fence(&self) -> Option<&Self::Fence> {
        self.fence.as_ref()
    }

    fn set_fence(&mut self, fence: Option<Self::Fence>) {
        self.fence = fence;
    }

    fn on_reuse(&mut self) {
        self.reuses += 1;
    }
}

#[test]
fn test_basic_frame_loop() {
    let (backend, context) = context(ResourceConfig::minimal());
    let released = Arc::new(AtomicUsize::new(0));

    for frame in 0..10u64 {
        if frame > 0 {
            backend.signal_all();
        }

        let fence = context.new_fence();
        let lease = context.allocate(MemoryUsage::ShaderData, 512, 256);
        let scratch = context.allocate_transient(1024, 256);
        assert_eq!(scratch.size, 1024);

        context.new_texture_garbage(
            TextureGarbage::new()
                .with_image(counting_release(&released))
                .with_view(counting_release(&released)),
        );
        context.new_buffer_garbage(BufferGarbage::new().with_memory(lease));
        context.end_frame(fence);
    }

    assert_eq!(context.frame_number(), 10);
    // Frame 9 is still in flight: its image and view are held back.
    assert_eq!(released.load(Ordering::SeqCst), 18);

    backend.signal_all();
    let last = context.new_fence();
    backend.signal(last.native());
    context.shutdown(last, Duration::from_millis(100));
    assert_eq!(released.load(Ordering::SeqCst), 20);
    assert_eq!(backend.live_blocks(), 0);
    assert_eq!(backend.live_fences(), 0);
}

#[test]
fn test_garbage_waits_for_its_frame() {
    let backend = HostBackend::shared();
    let fences = FencePool::new(backend.clone(), 4, Duration::from_secs(1));
    let collector = FrameGarbageCollector::new();
    let released = Arc::new(AtomicUsize::new(0));

    collector.new_buffer_garbage(BufferGarbage::new().with_buffer(counting_release(&released)));
    let fence = fences.acquire();
    let native = fence.native();
    assert_eq!(collector.end_frame(fence), 0);

    // Any number of polls before the GPU gets there must not release it.
    for _ in 0..50 {
        assert_eq!(collector.collect(), 0);
    }
    assert_eq!(released.load(Ordering::SeqCst), 0);

    backend.signal(native);
    assert_eq!(collector.collect(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(collector.stats().sealed_buckets, 0);
}

#[test]
fn test_garbage_respects_out_of_order_signals() {
    let backend = HostBackend::shared();
    let fences = FencePool::new(backend.clone(), 4, Duration::from_secs(1));
    let collector = FrameGarbageCollector::new();
    let released = Arc::new(AtomicUsize::new(0));

    let mut natives: Vec<HostFence> = Vec::new();
    for _ in 0..3 {
        collector.new_buffer_garbage(BufferGarbage::new().with_buffer(counting_release(&released)));
        let fence = fences.acquire();
        natives.push(fence.native());
        collector.end_frame(fence);
    }

    backend.signal(natives[2]);
    assert_eq!(collector.collect(), 1);
    backend.signal(natives[0]);
    assert_eq!(collector.collect(), 1);
    assert_eq!(collector.stats().pending_items, 1);

    backend.signal(natives[1]);
    assert_eq!(collector.wait_idle(Duration::from_millis(10)), 1);
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[test]
fn test_multithread_garbage_submission() {
    let (backend, context) = context(ResourceConfig::default());
    let context = Arc::new(context);
    let released = Arc::new(AtomicUsize::new(0));
    let num_threads = 4;
    let items_per_thread = 50;

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let context = context.clone();
            let released = released.clone();
            thread::spawn(move || {
                for _ in 0..items_per_thread {
                    let lease = context.allocate(MemoryUsage::Geometry, 300, 16);
                    context.new_buffer_garbage(
                        BufferGarbage::new()
                            .with_buffer(counting_release(&released))
                            .with_memory(lease),
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let fence = context.new_fence();
    let native = fence.native();
    context.end_frame(fence);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(
        context.garbage().stats().pending_items,
        num_threads * items_per_thread
    );

    backend.signal(native);
    let context = Arc::try_unwrap(context).expect("threads joined");
    let last = context.new_fence();
    backend.signal(last.native());
    context.shutdown(last, Duration::from_millis(100));
    assert_eq!(released.load(Ordering::SeqCst), num_threads * items_per_thread);
    assert_eq!(backend.live_blocks(), 0);
}

#[test]
fn test_fence_pool_blocks_at_cap_until_release() {
    let backend = HostBackend::shared();
    let pool = Arc::new(FencePool::new(backend.clone(), 2, Duration::from_secs(5)));

    let a = pool.acquire();
    let b = pool.acquire();
    let native = a.native();
    drop(a);

    let signaler = {
        let backend = backend.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            backend.signal(native);
        })
    };

    // Both fences exist; the released one is reused once the GPU passes it.
    let c = pool.acquire();
    signaler.join().expect("Thread panicked");
    assert_eq!(c.native(), native);
    assert_eq!(pool.stats().waits, 1);
    assert_eq!(pool.stats().created, 2);

    drop(b);
    drop(c);
    backend.signal_all();
    drop(pool);
    assert_eq!(backend.live_fences(), 0);
}

#[test]
fn test_recycler_across_threads() {
    let backend = HostBackend::shared();
    let fences = Arc::new(FencePool::new(backend.clone(), 32, Duration::from_secs(1)));
    let recycler = Arc::new(MicroObjectRecycler::<QueryPool>::new(
        "queries",
        RecyclerConfig::default(),
    ));
    let next_id = Arc::new(AtomicUsize::new(0));
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let recycler = recycler.clone();
            let fences = fences.clone();
            let backend = backend.clone();
            let next_id = next_id.clone();
            let in_use = in_use.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let pool = recycler.acquire_with(|| QueryPool {
                        id: next_id.fetch_add(1, Ordering::SeqCst) as u32,
                        fence: None,
                        reuses: 0,
                    });
                    assert!(in_use.lock().expect("lock").insert(pool.id));
                    in_use.lock().expect("lock").remove(&pool.id);

                    let fence = fences.acquire();
                    backend.signal(fence.native());
                    pool.retire(fence);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let stats = recycler.stats();
    assert_eq!(stats.requests, 400);
    assert!((stats.misses as usize) < 400);
    assert_eq!(next_id.load(Ordering::SeqCst), stats.misses as usize);
    assert_eq!(stats.cached, stats.ready);

    Arc::try_unwrap(recycler).expect("threads joined").destroy();
}

#[test]
fn test_recycled_object_waits_for_fence() {
    let backend = HostBackend::shared();
    let fences = FencePool::new(backend.clone(), 4, Duration::from_secs(1));
    let recycler = Arc::new(MicroObjectRecycler::<QueryPool>::new(
        "queries",
        RecyclerConfig::default(),
    ));

    let first = recycler.acquire_with(|| QueryPool {
        id: 7,
        fence: None,
        reuses: 0,
    });
    let fence = fences.acquire();
    let native = fence.native();
    first.retire(fence);

    assert!(recycler.find_to_reuse().is_none());
    backend.signal(native);

    let again = recycler.find_to_reuse().expect("fence signaled");
    assert_eq!((again.id, again.reuses), (7, 1));
    recycler.recycle(again);
}

#[test]
fn test_bindless_index_freed_with_garbage() {
    let backend = HostBackend::shared();
    let fences = FencePool::new(backend.clone(), 4, Duration::from_secs(1));
    let collector = FrameGarbageCollector::new();
    let indices = BindlessIndexAllocator::new(4);

    let index = indices.allocate().expect("capacity");
    collector.new_texture_garbage(TextureGarbage::new().with_bindless(index));
    let fence = fences.acquire();
    let native = fence.native();
    collector.end_frame(fence);
    assert_eq!(indices.in_use(), 1);

    backend.signal(native);
    collector.collect();
    assert_eq!(indices.in_use(), 0);
}

#[test]
fn test_segregated_pool_shared_between_threads() {
    let backend = HostBackend::shared();
    let pool = Arc::new(SegregatedListsGpuMemoryPool::new(
        backend.clone(),
        SegregatedPoolDesc::new("uniforms", BufferUsage::UNIFORM_BUFFER)
            .with_classes(vec![256, 1024, 4096])
            .with_pool_size(64 * 1024),
    ));
    let ranges = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pool = pool.clone();
            let ranges = ranges.clone();
            thread::spawn(move || {
                let leases: Vec<_> = (0..32)
                    .map(|i| pool.allocate_lease(100 + (i * 37 + t * 11) % 3000, 16))
                    .collect();
                let mut ranges = ranges.lock().expect("lock");
                for lease in &leases {
                    ranges.push((lease.block().id, lease.offset(), lease.size()));
                }
                leases
            })
        })
        .collect();

    let leases: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("Thread panicked"))
        .collect();

    let mut ranges = ranges.lock().expect("lock").clone();
    ranges.sort();
    for pair in ranges.windows(2) {
        let (block_a, offset_a, size_a) = pair[0];
        let (block_b, offset_b, _) = pair[1];
        assert!(block_a != block_b || offset_a + size_a <= offset_b);
    }

    assert_eq!(pool.get_stats().allocation_count, 128);
    drop(leases);
    assert_eq!(pool.get_stats().used_bytes, 0);
    pool.trim();
    drop(pool);
    assert_eq!(backend.live_blocks(), 0);
}

#[test]
fn test_backlog_warning_reaches_sink() {
    let backend = HostBackend::shared();
    let fences = FencePool::new(backend.clone(), 8, Duration::from_secs(1));
    let collector = FrameGarbageCollector::with_max_pending(2);
    let sink = Arc::new(CollectingSink::new());
    let previous = set_thread_sink(Some(sink.clone()));

    for _ in 0..4 {
        collector.new_texture_garbage(TextureGarbage::new());
        collector.end_frame(fences.acquire());
    }
    set_thread_sink(previous);

    assert_eq!(sink.codes(), vec!["GR203"]);
    backend.signal_all();
    assert_eq!(collector.wait_idle(Duration::from_millis(10)), 4);
}

#[test]
fn test_config_minimal() {
    let (backend, context) = context(ResourceConfig::minimal());
    assert_eq!(context.config().frames_in_flight, 2);
    assert_eq!(context.memory().transient().frames_in_flight(), 2);

    let fence = context.new_fence();
    backend.signal(fence.native());
    context.end_frame(fence);
    let last = context.new_fence();
    backend.signal(last.native());
    context.shutdown(last, Duration::from_millis(10));
}

#[test]
fn test_config_high_performance() {
    let (backend, context) = context(ResourceConfig::high_performance());
    let lease = context.allocate(MemoryUsage::Staging, 4 * 1024 * 1024, 256);
    assert_eq!(lease.size(), 4 * 1024 * 1024);
    drop(lease);

    let fence = context.new_fence();
    backend.signal(fence.native());
    context.end_frame(fence);
    let last = context.new_fence();
    backend.signal(last.native());
    context.shutdown(last, Duration::from_millis(10));
    assert_eq!(backend.live_blocks(), 0);
}

#[test]
#[should_panic(expected = "GR301")]
fn test_request_larger_than_largest_class() {
    let (_backend, context) = context(ResourceConfig::minimal());
    let _ = context.allocate(MemoryUsage::Geometry, 64 * 1024, 256);
}
