//! GPU memory sub-allocation.
//!
//! Two strategies over native blocks from a [`MemoryBackend`](crate::gpu::MemoryBackend):
//!
//! - [`SegregatedListsGpuMemoryPool`]: size-classed slots with explicit
//!   `allocate`/`free`, for long-lived buffers.
//! - [`StackGpuMemoryPool`] and the [`TransientMemoryPool`] ring built from
//!   it: bump allocation reset once per frame, for scratch data.
//!
//! [`GpuMemoryManager`] owns one of each per device.

mod manager;
mod segregated;
mod stack;
mod stats;
mod transient;

pub use manager::{GpuMemoryManager, MemoryUsage};
pub use segregated::{
    ChunkId, GpuAllocation, MemoryLease, SegregatedListsGpuMemoryPool, SegregatedPoolDesc,
    DEFAULT_CLASSES, MAX_SLOTS_PER_CHUNK,
};
pub use stack::{StackAllocation, StackGpuMemoryPool, StackPoolDesc};
pub use stats::{MemoryStats, PoolStats, StackStats};
pub use transient::TransientMemoryPool;
