//! Backend capability traits and types.
//!
//! A native backend implements only these two narrow capabilities. Fence
//! pooling, recycling, garbage collection and sub-allocation are written once
//! on top of them.

use std::fmt;
use std::time::Duration;

/// Errors reported by a native backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device heap is exhausted.
    OutOfDeviceMemory,
    /// Host memory or OS handles are exhausted.
    OutOfHostMemory,
    /// The device was lost; nothing submitted will complete.
    DeviceLost,
    /// The request was malformed (zero size, bad alignment, ...).
    InvalidRequest(String),
    /// Backend-specific error (opaque)
    Backend(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::OutOfDeviceMemory => write!(f, "out of device memory"),
            GpuError::OutOfHostMemory => write!(f, "out of host memory"),
            GpuError::DeviceLost => write!(f, "device lost"),
            GpuError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            GpuError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Buffer usage flags, bit-compatible with Vulkan's `VkBufferUsageFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage {
    pub bits: u32,
}

impl BufferUsage {
    pub const TRANSFER_SRC: Self = Self { bits: 0x0001 };
    pub const TRANSFER_DST: Self = Self { bits: 0x0002 };
    pub const UNIFORM_TEXEL_BUFFER: Self = Self { bits: 0x0004 };
    pub const STORAGE_TEXEL_BUFFER: Self = Self { bits: 0x0008 };
    pub const UNIFORM_BUFFER: Self = Self { bits: 0x0010 };
    pub const STORAGE_BUFFER: Self = Self { bits: 0x0020 };
    pub const INDEX_BUFFER: Self = Self { bits: 0x0040 };
    pub const VERTEX_BUFFER: Self = Self { bits: 0x0080 };
    pub const INDIRECT_BUFFER: Self = Self { bits: 0x0100 };

    /// No usage bits.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Whether any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.bits & other.bits != 0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

impl std::ops::BitOrAssign for BufferUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

/// Parameters for one block of native device memory.
#[derive(Debug, Clone, Copy)]
pub struct BlockDesc<'a> {
    /// Size in bytes.
    pub size: u64,
    /// Usage the block's buffer is created with.
    pub usage: BufferUsage,
    /// Only linear resources (buffers, linear images) will live in the block.
    pub linear_only: bool,
    /// Debug name of the owning pool.
    pub name: &'a str,
}

/// Native fence capability.
///
/// `Native` is a plain handle; the pool owns its lifetime and calls
/// `destroy_fence` exactly once per `create_fence`.
pub trait FenceBackend: Send + Sync + 'static {
    /// Native fence handle.
    type Native: Copy + Send + Sync + fmt::Debug + 'static;

    /// Create an unsignaled fence.
    fn create_fence(&self) -> Result<Self::Native, GpuError>;

    /// Destroy a fence. The GPU must no longer reference it.
    fn destroy_fence(&self, fence: Self::Native);

    /// Non-blocking status query: `true` once the GPU has passed the fence.
    fn fence_status(&self, fence: Self::Native) -> Result<bool, GpuError>;

    /// Block up to `timeout`. Returns whether the fence signaled.
    fn wait_fence(&self, fence: Self::Native, timeout: Duration) -> Result<bool, GpuError>;

    /// Return a signaled fence to the unsignaled state for reuse.
    fn reset_fence(&self, fence: Self::Native) -> Result<(), GpuError>;
}

/// Native device memory capability.
pub trait MemoryBackend: Send + Sync + 'static {
    /// A block of device memory with a buffer bound over all of it.
    type Block: Clone + Send + Sync + fmt::Debug + 'static;

    /// Allocate and bind a block.
    fn create_block(&self, desc: &BlockDesc<'_>) -> Result<Self::Block, GpuError>;

    /// Free a block. The GPU must no longer reference it.
    fn destroy_block(&self, block: Self::Block);

    /// Alignment every block's base offset satisfies.
    fn block_alignment(&self) -> u64;
}
