//! Routing of allocations to pools.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::segregated::{MemoryLease, SegregatedListsGpuMemoryPool, SegregatedPoolDesc};
use super::stack::{StackAllocation, StackPoolDesc};
use super::stats::MemoryStats;
use super::transient::TransientMemoryPool;
use crate::api::ResourceConfig;
use crate::fence::Signal;
use crate::gpu::{BufferUsage, MemoryBackend};

/// What an allocation is for. Each kind gets its own pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Vertex, index and indirect buffers.
    Geometry,
    /// Uniform and storage buffers.
    ShaderData,
    /// Upload and readback.
    Staging,
}

impl MemoryUsage {
    pub const ALL: [MemoryUsage; 3] = [Self::Geometry, Self::ShaderData, Self::Staging];

    /// Buffer usage the pool's chunks are created with.
    pub fn buffer_usage(self) -> BufferUsage {
        match self {
            Self::Geometry => {
                BufferUsage::VERTEX_BUFFER
                    | BufferUsage::INDEX_BUFFER
                    | BufferUsage::INDIRECT_BUFFER
                    | BufferUsage::TRANSFER_DST
            }
            Self::ShaderData => {
                BufferUsage::UNIFORM_BUFFER
                    | BufferUsage::STORAGE_BUFFER
                    | BufferUsage::UNIFORM_TEXEL_BUFFER
                    | BufferUsage::STORAGE_TEXEL_BUFFER
                    | BufferUsage::TRANSFER_DST
            }
            Self::Staging => BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
        }
    }

    /// Pick the pool for a buffer created with `usage`.
    pub fn from_buffer_usage(usage: BufferUsage) -> Self {
        let geometry =
            BufferUsage::VERTEX_BUFFER | BufferUsage::INDEX_BUFFER | BufferUsage::INDIRECT_BUFFER;
        let shader_data = BufferUsage::UNIFORM_BUFFER
            | BufferUsage::STORAGE_BUFFER
            | BufferUsage::UNIFORM_TEXEL_BUFFER
            | BufferUsage::STORAGE_TEXEL_BUFFER;
        if usage.intersects(geometry) {
            Self::Geometry
        } else if usage.intersects(shader_data) {
            Self::ShaderData
        } else {
            Self::Staging
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::ShaderData => "shader-data",
            Self::Staging => "staging",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Every GPU memory pool of a device.
///
/// General-purpose allocations go to one segregated-list pool per
/// [`MemoryUsage`]; per-frame scratch goes to the transient ring.
pub struct GpuMemoryManager<B: MemoryBackend, S: Signal> {
    pools: [Arc<SegregatedListsGpuMemoryPool<B>>; 3],
    transient: TransientMemoryPool<B, S>,
}

impl<B: MemoryBackend, S: Signal> GpuMemoryManager<B, S> {
    pub fn new(backend: Arc<B>, config: &ResourceConfig) -> Self {
        let pools = MemoryUsage::ALL.map(|usage| {
            Arc::new(SegregatedListsGpuMemoryPool::new(
                backend.clone(),
                SegregatedPoolDesc::new(usage.name(), usage.buffer_usage())
                    .with_classes(config.segregated_classes.clone())
                    .with_pool_size(config.segregated_pool_size)
                    .with_spare_chunks(config.spare_chunks_per_class),
            ))
        });

        let transient = TransientMemoryPool::new(
            backend,
            StackPoolDesc::new(
                "transient",
                BufferUsage::UNIFORM_BUFFER
                    | BufferUsage::STORAGE_BUFFER
                    | BufferUsage::INDIRECT_BUFFER
                    | BufferUsage::VERTEX_BUFFER
                    | BufferUsage::INDEX_BUFFER,
            )
            .with_initial_chunk(config.stack_initial_chunk)
            .with_growth(config.stack_scale, config.stack_bias)
            .with_max_chunk(config.stack_max_chunk),
            config.frames_in_flight,
            config.fence_wait_timeout,
        );

        Self { pools, transient }
    }

    /// Long-lived allocation, freed when the lease drops.
    pub fn allocate(&self, usage: MemoryUsage, size: u64, alignment: u64) -> MemoryLease<B> {
        self.pools[usage.index()].allocate_lease(size, alignment)
    }

    /// Scratch memory for the current frame only.
    pub fn allocate_transient(&self, size: u64, alignment: u64) -> StackAllocation<B::Block> {
        self.transient.allocate(size, alignment)
    }

    pub fn pool(&self, usage: MemoryUsage) -> &Arc<SegregatedListsGpuMemoryPool<B>> {
        &self.pools[usage.index()]
    }

    pub fn transient(&self) -> &TransientMemoryPool<B, S> {
        &self.transient
    }

    /// Rotate the transient ring; `fence` covers this frame's scratch data.
    pub fn end_frame(&self, fence: S) {
        self.transient.end_frame(fence);
    }

    /// Wait for in-flight scratch data and release idle chunks.
    pub fn wait_idle(&self, timeout: Duration) {
        self.transient.wait_idle(timeout);
        for pool in &self.pools {
            pool.trim();
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            pools: MemoryUsage::ALL
                .iter()
                .map(|&usage| (usage.name().to_string(), self.pools[usage.index()].get_stats()))
                .collect(),
            transient: self.transient.stats(),
        }
    }
}

impl<B: MemoryBackend, S: Signal> fmt::Debug for GpuMemoryManager<B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuMemoryManager")
            .field("pools", &self.pools)
            .field("transient", &self.transient)
            .finish()
    }
}
