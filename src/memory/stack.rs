//! Bump-pointer GPU memory, reset once per frame.

use std::fmt;
use std::sync::Arc;

use super::stats::StackStats;
use crate::diagnostics::macros::gr_log;
use crate::fence::Signal;
use crate::gpu::{BlockDesc, BufferUsage, MemoryBackend};
use crate::sync::mutex::Mutex;
use crate::util::layout::{align_up, round_up_to_multiple};
use crate::util::size::{kb, mb};

/// Parameters of a [`StackGpuMemoryPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct StackPoolDesc {
    pub name: String,
    pub usage: BufferUsage,
    /// Size of the first chunk.
    pub initial_chunk: u64,
    /// Each new chunk is `previous * scale + bias` bytes.
    pub scale: f64,
    pub bias: u64,
    /// No chunk grows past this, and no single allocation may exceed it.
    pub max_chunk: u64,
    pub linear_only: bool,
}

impl StackPoolDesc {
    pub fn new(name: impl Into<String>, usage: BufferUsage) -> Self {
        Self {
            name: name.into(),
            usage,
            initial_chunk: kb(256),
            scale: 2.0,
            bias: 0,
            max_chunk: mb(64),
            linear_only: true,
        }
    }

    /// Builder pattern: set the first chunk size.
    pub fn with_initial_chunk(mut self, size: u64) -> Self {
        self.initial_chunk = size;
        self
    }

    /// Builder pattern: set the growth function.
    pub fn with_growth(mut self, scale: f64, bias: u64) -> Self {
        self.scale = scale;
        self.bias = bias;
        self
    }

    /// Builder pattern: set the maximum chunk size.
    pub fn with_max_chunk(mut self, size: u64) -> Self {
        self.max_chunk = size;
        self
    }
}

/// A range handed out by a stack pool. Valid until the pool's next reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackAllocation<Block> {
    pub block: Block,
    pub offset: u64,
    pub size: u64,
    /// Chunk the range lives in.
    pub chunk_index: usize,
}

struct StackChunk<Block> {
    block: Block,
    size: u64,
}

struct StackState<Block> {
    chunks: Vec<StackChunk<Block>>,
    current: usize,
    offset: u64,
    used: u64,
    peak: u64,
    retired: Option<Box<dyn Signal>>,
}

/// Per-frame scratch allocator.
///
/// There is no per-allocation free. [`end_frame`](Self::end_frame) rewinds to
/// the start of the first chunk; the caller guarantees the GPU has consumed
/// everything allocated before, at frame granularity. In debug builds the
/// pool checks that guarantee against the fence passed to
/// [`retire`](Self::retire).
pub struct StackGpuMemoryPool<B: MemoryBackend> {
    backend: Arc<B>,
    desc: StackPoolDesc,
    state: Mutex<StackState<B::Block>>,
}

impl<B: MemoryBackend> StackGpuMemoryPool<B> {
    /// Chunks are created on first use.
    pub fn new(backend: Arc<B>, desc: StackPoolDesc) -> Self {
        Self {
            backend,
            desc,
            state: Mutex::new(StackState {
                chunks: Vec::new(),
                current: 0,
                offset: 0,
                used: 0,
                peak: 0,
                retired: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Bump-allocate `size` bytes.
    ///
    /// Moves to the next chunk when the current one is full, creating a
    /// larger chunk when there is none. Fatal (`GR401`) if `size` exceeds the
    /// maximum chunk size.
    pub fn allocate(&self, size: u64, alignment: u64) -> StackAllocation<B::Block> {
        let block_alignment = self.backend.block_alignment();
        crate::gr_check!(
            alignment.is_power_of_two() && alignment <= block_alignment,
            GR305,
            "stack pool '{}': alignment {} (block alignment {})",
            self.desc.name,
            alignment,
            block_alignment
        );
        if size > self.desc.max_chunk {
            crate::gr_fatal!(
                GR401,
                "stack pool '{}': requested {} bytes, max chunk is {}",
                self.desc.name,
                size,
                self.desc.max_chunk
            );
        }

        let mut state = self.state.lock();
        loop {
            let current = state.current;
            if current == state.chunks.len() {
                let chunk = self.create_chunk(state.chunks.last().map(|chunk| chunk.size), size);
                state.chunks.push(chunk);
                state.offset = 0;
            }

            let start = align_up(state.offset, alignment);
            let chunk = &state.chunks[current];
            if start + size <= chunk.size {
                let allocation = StackAllocation {
                    block: chunk.block.clone(),
                    offset: start,
                    size,
                    chunk_index: current,
                };
                state.used += start + size - state.offset;
                state.offset = start + size;
                return allocation;
            }

            state.current += 1;
            state.offset = 0;
        }
    }

    /// Attach the fence of the frame that used this pool's memory.
    pub fn retire(&self, fence: impl Signal + 'static) {
        self.state.lock().retired = Some(Box::new(fence));
    }

    /// Rewind to offset 0 of the first chunk.
    ///
    /// Debug builds fatally assert (`GR402`) that the fence passed to
    /// [`retire`](Self::retire) is done.
    pub fn end_frame(&self) {
        let mut state = self.state.lock();
        if let Some(fence) = state.retired.take() {
            if cfg!(debug_assertions) && !fence.done() {
                crate::gr_fatal!(
                    GR402,
                    "stack pool '{}': {} bytes of the previous frame may still be in use",
                    self.desc.name,
                    state.used
                );
            }
        }

        state.peak = state.peak.max(state.used);
        state.current = 0;
        state.offset = 0;
        state.used = 0;
    }

    /// Snapshot of the pool.
    pub fn stats(&self) -> StackStats {
        let state = self.state.lock();
        StackStats {
            used_bytes: state.used,
            total_bytes: state.chunks.iter().map(|chunk| chunk.size).sum(),
            chunk_count: state.chunks.len() as u64,
            peak_bytes: state.peak.max(state.used),
        }
    }

    fn create_chunk(&self, previous: Option<u64>, request: u64) -> StackChunk<B::Block> {
        let grown = match previous {
            Some(previous) => (previous as f64 * self.desc.scale) as u64 + self.desc.bias,
            None => self.desc.initial_chunk,
        };
        let alignment = self.backend.block_alignment();
        let size = round_up_to_multiple(grown.max(request).min(self.desc.max_chunk), alignment)
            .max(request);

        let desc = BlockDesc {
            size,
            usage: self.desc.usage,
            linear_only: self.desc.linear_only,
            name: &self.desc.name,
        };
        match self.backend.create_block(&desc) {
            Ok(block) => {
                gr_log!(debug, "stack pool '{}': new {} byte chunk", self.desc.name, size);
                StackChunk { block, size }
            }
            Err(err) => crate::gr_fatal!(
                GR901,
                "stack pool '{}': {} byte chunk: {}",
                self.desc.name,
                size,
                err
            ),
        }
    }
}

impl<B: MemoryBackend> Drop for StackGpuMemoryPool<B> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        let state = self.state.get_mut();
        if let Some(fence) = state.retired.take() {
            if !fence.done() {
                crate::gr_fatal!(
                    GR402,
                    "stack pool '{}' dropped while its last frame is pending",
                    self.desc.name
                );
            }
        }
        for chunk in state.chunks.drain(..) {
            self.backend.destroy_block(chunk.block);
        }
    }
}

impl<B: MemoryBackend> fmt::Debug for StackGpuMemoryPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackGpuMemoryPool")
            .field("desc", &self.desc)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::testing::ManualFence;
    use crate::gpu::HostBackend;

    fn stack(backend: &Arc<HostBackend>) -> StackGpuMemoryPool<HostBackend> {
        StackGpuMemoryPool::new(
            backend.clone(),
            StackPoolDesc::new("scratch", BufferUsage::UNIFORM_BUFFER)
                .with_initial_chunk(kb(1))
                .with_growth(2.0, 256)
                .with_max_chunk(kb(16)),
        )
    }

    #[test]
    fn test_fill_then_reset() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);

        let first = pool.allocate(512, 16);
        let second = pool.allocate(512, 16);
        assert_eq!((first.offset, second.offset), (0, 512));
        assert_eq!(second.chunk_index, 0);
        assert_eq!(pool.stats().chunk_count, 1);

        pool.end_frame();
        let again = pool.allocate(64, 16);
        assert_eq!((again.offset, again.chunk_index), (0, 0));
        assert_eq!(pool.stats().peak_bytes, kb(1));
    }

    #[test]
    fn test_one_byte_past_capacity_grows() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);

        let _ = pool.allocate(kb(1), 1);
        let spill = pool.allocate(1, 1);
        assert_eq!((spill.chunk_index, spill.offset), (1, 0));

        let stats = pool.stats();
        assert_eq!(stats.chunk_count, 2);
        // 1024 * 2.0 + 256
        assert_eq!(stats.total_bytes, kb(1) + 2304);
        assert_eq!(backend.blocks_created(), 2);

        // Chunks are kept: the next frame walks the same two.
        pool.end_frame();
        let _ = pool.allocate(kb(1), 1);
        assert_eq!(pool.allocate(1, 1).chunk_index, 1);
        assert_eq!(backend.blocks_created(), 2);
    }

    #[test]
    fn test_alignment_within_chunk() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);

        let _ = pool.allocate(3, 1);
        let aligned = pool.allocate(8, 256);
        assert_eq!(aligned.offset, 256);
        assert_eq!(pool.stats().used_bytes, 264);
    }

    #[test]
    fn test_large_request_gets_its_own_size() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);

        let big = pool.allocate(kb(10), 256);
        assert_eq!(big.chunk_index, 0);
        assert_eq!(pool.stats().total_bytes, kb(10));
    }

    #[test]
    fn test_retired_fence_checked_on_reset() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);
        let fence = Arc::new(ManualFence::default());

        let _ = pool.allocate(128, 16);
        pool.retire(fence.clone());
        fence.signal();
        pool.end_frame();
        assert_eq!(pool.stats().used_bytes, 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "GR402")]
    fn test_reset_before_fence() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);

        let _ = pool.allocate(128, 16);
        pool.retire(Arc::new(ManualFence::default()));
        pool.end_frame();
    }

    #[test]
    #[should_panic(expected = "GR401")]
    fn test_larger_than_max_chunk() {
        let backend = HostBackend::shared();
        let pool = stack(&backend);
        let _ = pool.allocate(kb(16) + 1, 1);
    }

    #[test]
    fn test_blocks_destroyed_on_drop() {
        let backend = HostBackend::shared();
        {
            let pool = stack(&backend);
            let _ = pool.allocate(kb(2), 1);
            let _ = pool.allocate(kb(4), 1);
        }
        assert_eq!(backend.live_blocks(), 0);
    }
}
