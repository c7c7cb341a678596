//! GPU backend capabilities.
//!
//! ## Backends
//! - `host`: software fences and bookkeeping memory (always available)
//! - `vulkan`: via the `ash` crate (enable the `gpu-vulkan` feature)

// Always present for API stability: traits define the interface
pub mod traits;
pub use traits::{BlockDesc, BufferUsage, FenceBackend, GpuError, MemoryBackend};

pub mod host;
pub use host::{HostBackend, HostBlock, HostFence};

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
