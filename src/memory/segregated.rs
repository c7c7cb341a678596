//! Segregated-list sub-allocator.
//!
//! Requests are rounded up to a size class. Each class owns a set of chunks,
//! one native block per chunk, split into equal slots tracked by a 64-bit
//! free mask. Chunks live in a per-class arena addressed by index and
//! generation, so a token never points at a chunk that was released and
//! recreated.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::stats::PoolStats;
use crate::diagnostics::macros::gr_log;
use crate::gpu::{BlockDesc, BufferUsage, MemoryBackend};
use crate::sync::mutex::Mutex;
use crate::util::layout::align_up;
use crate::util::size::{kb, mb};

/// Upper bound on slots per chunk (one bit each in the free mask).
pub const MAX_SLOTS_PER_CHUNK: u32 = 64;

/// Size classes used when a description does not set its own.
pub const DEFAULT_CLASSES: &[u64] = &[256, kb(1), kb(4), kb(16), kb(64), kb(256), mb(1)];

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Parameters of a [`SegregatedListsGpuMemoryPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegregatedPoolDesc {
    /// Debug name, used in diagnostics and passed to the backend.
    pub name: String,
    /// Usage every chunk's buffer is created with.
    pub usage: BufferUsage,
    /// Slot sizes, strictly increasing. The last one is the largest request
    /// the pool accepts.
    pub classes: Vec<u64>,
    /// Target chunk size. A class gets `pool_size / class` slots per chunk,
    /// clamped to `1..=64`.
    pub pool_size: u64,
    /// Chunks will only hold linear resources.
    pub linear_only: bool,
    /// Fully free chunks each class keeps before releasing to the backend.
    pub spare_chunks_per_class: usize,
}

impl SegregatedPoolDesc {
    pub fn new(name: impl Into<String>, usage: BufferUsage) -> Self {
        Self {
            name: name.into(),
            usage,
            classes: DEFAULT_CLASSES.to_vec(),
            pool_size: mb(4),
            linear_only: true,
            spare_chunks_per_class: 1,
        }
    }

    /// Builder pattern: set the size classes.
    pub fn with_classes(mut self, classes: impl Into<Vec<u64>>) -> Self {
        self.classes = classes.into();
        self
    }

    /// Builder pattern: set the target chunk size.
    pub fn with_pool_size(mut self, size: u64) -> Self {
        self.pool_size = size;
        self
    }

    /// Builder pattern: allow non-linear resources.
    pub fn with_linear_only(mut self, linear_only: bool) -> Self {
        self.linear_only = linear_only;
        self
    }

    /// Builder pattern: set chunk release hysteresis.
    pub fn with_spare_chunks(mut self, spare: usize) -> Self {
        self.spare_chunks_per_class = spare;
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("no size classes".into());
        }
        if self.classes[0] == 0 {
            return Err("zero-sized class".into());
        }
        if let Some(pair) = self.classes.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(format!("classes {} and {} are not increasing", pair[0], pair[1]));
        }
        let largest = self.classes[self.classes.len() - 1];
        if largest > self.pool_size {
            return Err(format!("class {} exceeds pool size {}", largest, self.pool_size));
        }
        Ok(())
    }
}

/// Stable chunk identifier within one size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub index: u32,
    pub generation: u32,
}

/// A live sub-allocation.
///
/// Exactly one exists per outstanding allocation: it is not `Clone`, and
/// [`SegregatedListsGpuMemoryPool::free`] consumes it.
#[must_use = "dropping a GpuAllocation leaks its slot; free it or wrap it in a MemoryLease"]
#[derive(Debug)]
pub struct GpuAllocation<Block> {
    pool_id: u64,
    offset: u64,
    size: u64,
    class_index: u32,
    chunk: ChunkId,
    slot: u32,
    block: Block,
}

impl<Block> GpuAllocation<Block> {
    /// Byte offset inside [`block`](Self::block).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested size.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn class_index(&self) -> u32 {
        self.class_index
    }

    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Slot within the chunk.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Native block (buffer + memory) backing the allocation.
    pub fn block(&self) -> &Block {
        &self.block
    }
}

struct Chunk<Block> {
    block: Block,
    /// Bit set means the slot is free.
    free_mask: u64,
}

struct ChunkEntry<Block> {
    generation: u32,
    chunk: Option<Chunk<Block>>,
}

struct SizeClass<Block> {
    slot_size: u64,
    slots_per_chunk: u32,
    entries: Vec<ChunkEntry<Block>>,
    vacant: Vec<u32>,
    live_chunks: u32,
    free_chunks: u32,
    allocations: u64,
    used_bytes: u64,
}

impl<Block> SizeClass<Block> {
    fn full_mask(&self) -> u64 {
        if self.slots_per_chunk == 64 {
            u64::MAX
        } else {
            (1u64 << self.slots_per_chunk) - 1
        }
    }

    fn chunk_bytes(&self) -> u64 {
        self.slot_size * u64::from(self.slots_per_chunk)
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk<Block>> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.chunk.as_mut())
    }

    fn insert(&mut self, block: Block) -> ChunkId {
        let chunk = Chunk {
            block,
            free_mask: self.full_mask(),
        };
        self.live_chunks += 1;
        self.free_chunks += 1;

        match self.vacant.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.chunk = Some(chunk);
                ChunkId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(ChunkEntry {
                    generation: 0,
                    chunk: Some(chunk),
                });
                ChunkId {
                    index: self.entries.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    fn remove(&mut self, index: u32) -> Option<Block> {
        let entry = &mut self.entries[index as usize];
        let chunk = entry.chunk.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.vacant.push(index);
        self.live_chunks -= 1;
        self.free_chunks -= 1;
        Some(chunk.block)
    }

    /// Longest run of free slots in any chunk, and the total free slots.
    fn free_runs(&self) -> (u64, u64) {
        let mut longest = 0;
        let mut total = 0;
        for chunk in self.entries.iter().filter_map(|entry| entry.chunk.as_ref()) {
            total += u64::from(chunk.free_mask.count_ones());
            longest = longest.max(u64::from(longest_run(chunk.free_mask)));
        }
        (longest, total)
    }
}

fn longest_run(mut mask: u64) -> u32 {
    let mut longest = 0;
    while mask != 0 {
        mask >>= mask.trailing_zeros();
        let run = (!mask).trailing_zeros();
        longest = longest.max(run);
        mask = mask.checked_shr(run).unwrap_or(0);
    }
    longest
}

/// General-purpose GPU sub-allocator over native blocks.
///
/// `allocate` and `free` lock only the size class involved.
pub struct SegregatedListsGpuMemoryPool<B: MemoryBackend> {
    backend: Arc<B>,
    id: u64,
    name: String,
    usage: BufferUsage,
    linear_only: bool,
    spare_chunks: usize,
    class_sizes: Box<[u64]>,
    classes: Box<[Mutex<SizeClass<B::Block>>]>,
}

impl<B: MemoryBackend> SegregatedListsGpuMemoryPool<B> {
    /// Set up the classes. No native memory is created until the first
    /// allocation.
    ///
    /// Fatal (`GR302`) if the class table is malformed.
    pub fn new(backend: Arc<B>, desc: SegregatedPoolDesc) -> Self {
        if let Err(reason) = desc.validate() {
            crate::gr_fatal!(GR302, "pool '{}': {}", desc.name, reason);
        }

        let classes = desc
            .classes
            .iter()
            .map(|&slot_size| {
                let slots = (desc.pool_size / slot_size).clamp(1, u64::from(MAX_SLOTS_PER_CHUNK));
                Mutex::new(SizeClass {
                    slot_size,
                    slots_per_chunk: slots as u32,
                    entries: Vec::new(),
                    vacant: Vec::new(),
                    live_chunks: 0,
                    free_chunks: 0,
                    allocations: 0,
                    used_bytes: 0,
                })
            })
            .collect();

        gr_log!(
            debug,
            "pool '{}': {} size classes, target chunk {} bytes",
            desc.name,
            desc.classes.len(),
            desc.pool_size
        );

        Self {
            backend,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: desc.name,
            usage: desc.usage,
            linear_only: desc.linear_only,
            spare_chunks: desc.spare_chunks_per_class,
            class_sizes: desc.classes.into_boxed_slice(),
            classes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Slot sizes, smallest first.
    pub fn class_sizes(&self) -> &[u64] {
        &self.class_sizes
    }

    /// Class that would serve a request, or `None` if it is too large or
    /// the alignment is not a power of two.
    pub fn class_for(&self, size: u64, alignment: u64) -> Option<usize> {
        if !alignment.is_power_of_two() {
            return None;
        }
        // Bounds the padding below so it cannot overflow.
        let largest = *self.class_sizes.last()?;
        if size > largest || alignment > largest {
            return None;
        }
        let padded = align_up(size.max(1), alignment);
        self.class_sizes
            .iter()
            .position(|&class| class >= padded && class % alignment == 0)
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Fatal if the request is larger than the largest class (`GR301`), the
    /// alignment is unsupported (`GR305`) or the backend cannot create a
    /// chunk (`GR901`).
    pub fn allocate(&self, size: u64, alignment: u64) -> GpuAllocation<B::Block> {
        let block_alignment = self.backend.block_alignment();
        crate::gr_check!(
            alignment.is_power_of_two() && alignment <= block_alignment,
            GR305,
            "pool '{}': alignment {} (block alignment {})",
            self.name,
            alignment,
            block_alignment
        );

        let class_index = match self.class_for(size, alignment) {
            Some(index) => index,
            None => crate::gr_fatal!(
                GR301,
                "pool '{}': requested {} bytes aligned to {}, largest class is {}",
                self.name,
                size,
                alignment,
                self.class_sizes[self.class_sizes.len() - 1]
            ),
        };

        let mut class = self.classes[class_index].lock();

        let found = class.entries.iter().enumerate().find_map(|(index, entry)| {
            entry
                .chunk
                .as_ref()
                .filter(|chunk| chunk.free_mask != 0)
                .map(|_| ChunkId {
                    index: index as u32,
                    generation: entry.generation,
                })
        });

        let chunk_id = match found {
            Some(id) => id,
            None => {
                let chunk_bytes = class.chunk_bytes();
                let block = self.create_chunk(chunk_bytes, class_index);
                class.insert(block)
            }
        };

        let full_mask = class.full_mask();
        let slot_size = class.slot_size;
        let Some(chunk) = class.chunk_mut(chunk_id) else {
            unreachable!("chunk {:?} vanished under the class lock", chunk_id)
        };
        let was_empty = chunk.free_mask == full_mask;
        let slot = chunk.free_mask.trailing_zeros();
        chunk.free_mask &= !(1u64 << slot);
        let block = chunk.block.clone();

        if was_empty {
            class.free_chunks -= 1;
        }
        class.allocations += 1;
        class.used_bytes += size;

        GpuAllocation {
            pool_id: self.id,
            offset: u64::from(slot) * slot_size,
            size,
            class_index: class_index as u32,
            chunk: chunk_id,
            slot,
            block,
        }
    }

    /// Allocate and wrap the result in a lease that frees itself on drop.
    pub fn allocate_lease(self: &Arc<Self>, size: u64, alignment: u64) -> MemoryLease<B> {
        MemoryLease {
            allocation: Some(self.allocate(size, alignment)),
            pool: Arc::clone(self),
        }
    }

    /// Return an allocation to the pool.
    ///
    /// A chunk that becomes fully free is released to the backend unless the
    /// class is already keeping its quota of spare chunks. Fatal (`GR304`) if
    /// the token does not belong to this pool.
    pub fn free(&self, allocation: GpuAllocation<B::Block>) {
        let class_index = allocation.class_index as usize;
        if allocation.pool_id != self.id || class_index >= self.classes.len() {
            crate::gr_fatal!(
                GR304,
                "pool '{}': token from pool #{} class {}",
                self.name,
                allocation.pool_id,
                allocation.class_index
            );
        }

        let mut class = self.classes[class_index].lock();
        let full_mask = class.full_mask();
        let bit = 1u64 << allocation.slot;

        let now_empty = match class.chunk_mut(allocation.chunk) {
            Some(chunk) if chunk.free_mask & bit == 0 => {
                chunk.free_mask |= bit;
                chunk.free_mask == full_mask
            }
            _ => crate::gr_fatal!(
                GR304,
                "pool '{}': class {} chunk {:?} slot {} is not allocated",
                self.name,
                class_index,
                allocation.chunk,
                allocation.slot
            ),
        };

        class.allocations -= 1;
        class.used_bytes -= allocation.size;

        if now_empty {
            class.free_chunks += 1;
            if class.free_chunks as usize > self.spare_chunks {
                if let Some(block) = class.remove(allocation.chunk.index) {
                    gr_log!(
                        trace,
                        "pool '{}': releasing chunk of class {}",
                        self.name,
                        class.slot_size
                    );
                    self.backend.destroy_block(block);
                }
            }
        }
    }

    /// Release every fully free chunk, ignoring the spare-chunk quota.
    ///
    /// Returns the number of bytes given back to the backend.
    pub fn trim(&self) -> u64 {
        let mut released = 0;
        for class in self.classes.iter() {
            let mut class = class.lock();
            let full_mask = class.full_mask();
            let chunk_bytes = class.chunk_bytes();
            let empty: Vec<u32> = class
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| {
                    entry
                        .chunk
                        .as_ref()
                        .map_or(false, |chunk| chunk.free_mask == full_mask)
                })
                .map(|(index, _)| index as u32)
                .collect();

            for index in empty {
                if let Some(block) = class.remove(index) {
                    self.backend.destroy_block(block);
                    released += chunk_bytes;
                }
            }
        }
        released
    }

    /// Telemetry snapshot.
    pub fn get_stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        let mut free_bytes = 0u64;
        let mut largest_run_bytes = 0u64;

        for class in self.classes.iter() {
            let class = class.lock();
            let (longest, free) = class.free_runs();
            free_bytes += free * class.slot_size;
            largest_run_bytes += longest * class.slot_size;

            stats.used_bytes += class.used_bytes;
            stats.total_bytes += u64::from(class.live_chunks) * class.chunk_bytes();
            stats.allocation_count += class.allocations;
            stats.chunk_count += u64::from(class.live_chunks);
        }

        if free_bytes > 0 {
            stats.fragmentation = 1.0 - largest_run_bytes as f64 / free_bytes as f64;
        }
        stats
    }

    fn create_chunk(&self, size: u64, class_index: usize) -> B::Block {
        let desc = BlockDesc {
            size,
            usage: self.usage,
            linear_only: self.linear_only,
            name: &self.name,
        };
        match self.backend.create_block(&desc) {
            Ok(block) => {
                gr_log!(
                    debug,
                    "pool '{}': new {} byte chunk for class {}",
                    self.name,
                    size,
                    self.class_sizes[class_index]
                );
                block
            }
            Err(err) => crate::gr_fatal!(
                GR901,
                "pool '{}': {} byte chunk for class {}: {}",
                self.name,
                size,
                self.class_sizes[class_index],
                err
            ),
        }
    }
}

impl<B: MemoryBackend> Drop for SegregatedListsGpuMemoryPool<B> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let live: u64 = self.classes.iter_mut().map(|class| class.get_mut().allocations).sum();
        if live > 0 {
            crate::gr_fatal!(GR303, "pool '{}': {} allocations still live", self.name, live);
        }

        for class in self.classes.iter_mut() {
            for entry in class.get_mut().entries.drain(..) {
                if let Some(chunk) = entry.chunk {
                    self.backend.destroy_block(chunk.block);
                }
            }
        }
    }
}

impl<B: MemoryBackend> fmt::Debug for SegregatedListsGpuMemoryPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegregatedListsGpuMemoryPool")
            .field("name", &self.name)
            .field("classes", &self.class_sizes)
            .finish()
    }
}

/// An allocation that frees itself when dropped.
///
/// Move one into a garbage item to keep the memory until the GPU is done.
pub struct MemoryLease<B: MemoryBackend> {
    allocation: Option<GpuAllocation<B::Block>>,
    pool: Arc<SegregatedListsGpuMemoryPool<B>>,
}

impl<B: MemoryBackend> MemoryLease<B> {
    pub fn pool(&self) -> &Arc<SegregatedListsGpuMemoryPool<B>> {
        &self.pool
    }

    /// Give up automatic freeing.
    pub fn into_allocation(mut self) -> GpuAllocation<B::Block> {
        match self.allocation.take() {
            Some(allocation) => allocation,
            None => unreachable!("lease emptied before drop"),
        }
    }
}

impl<B: MemoryBackend> Deref for MemoryLease<B> {
    type Target = GpuAllocation<B::Block>;

    fn deref(&self) -> &Self::Target {
        match &self.allocation {
            Some(allocation) => allocation,
            None => unreachable!("lease emptied before drop"),
        }
    }
}

impl<B: MemoryBackend> Drop for MemoryLease<B> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.pool.free(allocation);
        }
    }
}

impl<B: MemoryBackend> fmt::Debug for MemoryLease<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLease")
            .field("pool", &self.pool.name)
            .field("allocation", &self.allocation)
            .finish()
    }
}
