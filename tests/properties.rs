//! Seeded randomized checks of the lifetime rules.
//!
//! Each test drives a pool through a pseudo-random schedule and checks an
//! invariant after every step. Seeds are fixed so failures reproduce.

use fencealloc::{
    BufferGarbage, BufferUsage, Fence, FencePool, FrameGarbageCollector, HostBackend,
    MicroObjectRecycler, Recyclable, RecyclerConfig, SegregatedListsGpuMemoryPool,
    SegregatedPoolDesc, StackGpuMemoryPool, StackPoolDesc,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn fences(backend: &Arc<HostBackend>, cap: usize) -> FencePool<HostBackend> {
    FencePool::new(backend.clone(), cap, Duration::from_secs(1))
}

#[test]
fn prop_garbage_released_only_after_its_poll() {
    let backend = HostBackend::shared();
    let pool = fences(&backend, 4);
    let mut rng = XorShift::new(0x5eed_0001);

    for _ in 0..64 {
        let collector = FrameGarbageCollector::new();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        collector.new_buffer_garbage(BufferGarbage::new().with_buffer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let polls = rng.below(16) as u32;
        let fence = pool.acquire();
        backend.signal_after_polls(fence.native(), polls);
        // end_frame polls once; the fence reports done on poll `polls + 1`.
        collector.end_frame(fence);
        for poll in 1..=polls {
            assert_eq!(released.load(Ordering::SeqCst), 0, "released early at poll {}", poll);
            collector.collect();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn prop_never_signaled_garbage_is_never_released() {
    let backend = HostBackend::shared();
    let pool = fences(&backend, 64);
    let collector = FrameGarbageCollector::with_max_pending(usize::MAX);
    let released = Arc::new(AtomicUsize::new(0));
    let mut rng = XorShift::new(0x5eed_0002);
    let mut queued = 0;

    for _ in 0..48 {
        for _ in 0..rng.below(5) {
            let counter = released.clone();
            collector.new_buffer_garbage(BufferGarbage::new().with_buffer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            queued += 1;
        }
        collector.end_frame(pool.acquire());
        for _ in 0..rng.below(3) {
            collector.collect();
        }
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    backend.signal_all();
    collector.wait_idle(Duration::from_millis(10));
    assert_eq!(released.load(Ordering::SeqCst), queued);
}

struct Timestamps {
    id: usize,
    fence: Option<Fence<HostBackend>>,
}

impl Recyclable for Timestamps {
    type Fence = Fence<HostBackend>;

    fn fence(&self) -> Option<&Self::Fence> {
        self.fence.as_ref()
    }

    fn set_fence(&mut self, fence: Option<Self::Fence>) {
        self.fence = fence;
    }
}

#[test]
fn prop_recycler_never_hands_out_pending_objects() {
    let backend = HostBackend::shared();
    let pool = fences(&backend, 64);
    let recycler = MicroObjectRecycler::<Timestamps>::new(
        "timestamps",
        RecyclerConfig {
            max_cached: 16,
            adjust_window: 8,
        },
    );
    let mut rng = XorShift::new(0x5eed_0003);
    // Object id -> native fence of its last retirement, while unsignaled.
    let mut pending = HashMap::new();
    let mut next_id = 0;
    let mut held: Vec<Timestamps> = Vec::new();

    for _ in 0..500 {
        match rng.below(4) {
            0 | 1 => {
                let object = match recycler.find_to_reuse() {
                    Some(object) => {
                        assert!(
                            !pending.contains_key(&object.id),
                            "object {} reused before its fence",
                            object.id
                        );
                        object
                    }
                    None => {
                        next_id += 1;
                        Timestamps {
                            id: next_id,
                            fence: None,
                        }
                    }
                };
                held.push(object);
            }
            2 if !held.is_empty() => {
                let index = rng.below(held.len() as u64) as usize;
                let mut object = held.swap_remove(index);
                let fence = pool.acquire();
                pending.insert(object.id, fence.native());
                object.set_fence(Some(fence));
                recycler.recycle(object);
            }
            _ => {
                let ids: Vec<_> = pending.keys().copied().collect();
                for id in ids {
                    if rng.below(2) == 0 {
                        if let Some(native) = pending.remove(&id) {
                            backend.signal(native);
                        }
                    }
                }
                recycler.trim_cache();
            }
        }
    }

    backend.signal_all();
    drop(held);
    recycler.destroy();
}

#[test]
fn prop_segregated_round_trip_never_aliases() {
    let backend = HostBackend::shared();
    let pool = SegregatedListsGpuMemoryPool::new(
        backend.clone(),
        SegregatedPoolDesc::new("prop", BufferUsage::STORAGE_BUFFER)
            .with_classes(vec![256, 1024, 4096, 16384])
            .with_pool_size(64 * 1024)
            .with_spare_chunks(0),
    );
    let mut rng = XorShift::new(0x5eed_0004);
    let mut live = Vec::new();
    let alignments = [1, 4, 16, 64, 256];

    for step in 0..2000 {
        if live.is_empty() || rng.below(3) != 0 {
            let size = 1 + rng.below(16384);
            let alignment = alignments[rng.below(alignments.len() as u64) as usize];
            let allocation = pool.allocate(size, alignment);
            assert_eq!(allocation.offset() % alignment, 0);
            assert!(allocation.size() >= size);
            live.push(allocation);
        } else {
            let index = rng.below(live.len() as u64) as usize;
            pool.free(live.swap_remove(index));
        }

        if step % 100 == 0 {
            let mut ranges: Vec<_> = live
                .iter()
                .map(|a| (a.block().id, a.offset(), a.offset() + a.size()))
                .collect();
            ranges.sort();
            for pair in ranges.windows(2) {
                assert!(pair[0].0 != pair[1].0 || pair[0].2 <= pair[1].1);
            }
            let used: u64 = live.iter().map(|a| a.size()).sum();
            assert_eq!(pool.get_stats().used_bytes, used);
        }
    }

    for allocation in live.drain(..) {
        pool.free(allocation);
    }
    let stats = pool.get_stats();
    assert_eq!((stats.used_bytes, stats.allocation_count), (0, 0));
    assert_eq!(stats.chunk_count, 0);
    drop(pool);
    assert_eq!(backend.live_block_bytes(), 0);
}

#[test]
fn prop_stack_ranges_disjoint_within_a_frame() {
    let backend = HostBackend::shared();
    let pool = StackGpuMemoryPool::new(
        backend.clone(),
        StackPoolDesc::new("prop", BufferUsage::UNIFORM_BUFFER)
            .with_initial_chunk(4096)
            .with_growth(1.5, 512)
            .with_max_chunk(64 * 1024),
    );
    let mut rng = XorShift::new(0x5eed_0005);
    let mut chunks_seen = 0;

    for _frame in 0..50 {
        let mut ranges = Vec::new();
        for _ in 0..rng.below(40) {
            let size = 1 + rng.below(8192);
            let alignment = 1 << rng.below(9);
            let allocation = pool.allocate(size, alignment);
            assert_eq!(allocation.offset % alignment, 0);
            assert!(allocation.offset + size <= allocation.block.size);
            ranges.push((allocation.block.id, allocation.offset, allocation.offset + size));
        }

        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].0 != pair[1].0 || pair[0].2 <= pair[1].1);
        }

        let chunks = pool.stats().chunk_count;
        assert!(chunks >= chunks_seen, "chunks are kept across frames");
        chunks_seen = chunks;
        pool.end_frame();
        assert_eq!(pool.stats().used_bytes, 0);
    }
}
