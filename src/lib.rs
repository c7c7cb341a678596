//! # fencealloc
//!
//! Fence-gated GPU resource lifetimes and sub-allocation for Rust engines.
//!
//! The GPU runs behind the CPU. Anything the CPU destroys or reuses may
//! still be read by submitted work, so every reuse in this crate is gated
//! on a [`Fence`] the GPU signals when it is done.
//!
//! ## Features
//!
//! - Bounded fence pool that recycles native fences
//! - Micro-object recycler for samplers, query pools and other driver objects
//! - Frame garbage collector for destroyed textures and buffers
//! - Segregated-list sub-allocator for long-lived buffer memory
//! - Per-frame stack allocator and a transient ring over it
//! - One narrow backend trait pair, implemented in software and for Vulkan
//! - Coded diagnostics; invariant violations stop the process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fencealloc::{GpuResourceContext, HostBackend, MemoryUsage, ResourceConfig};
//! use std::time::Duration;
//!
//! let backend = HostBackend::shared();
//! let context = GpuResourceContext::new(backend.clone(), ResourceConfig::default());
//!
//! // Game loop
//! let fence = context.new_fence();
//! let vertices = context.allocate(MemoryUsage::Geometry, 64 * 1024, 256);
//! let scratch = context.allocate_transient(1024, 256);
//! // ... record and submit work that signals `fence` ...
//! context.end_frame(fence);
//!
//! drop(vertices);
//! backend.signal_all();
//! let last = context.new_fence();
//! backend.signal(last.native());
//! context.shutdown(last, Duration::from_secs(1));
//! ```

pub mod api;
pub mod diagnostics;
pub mod fence;
pub mod garbage;
pub mod gpu;
pub mod memory;
pub mod recycler;
pub mod util;

mod sync;

#[cfg(feature = "debug")]
mod debug;

// Re-export public API at crate root for convenience
pub use api::{GpuResourceContext, ResourceConfig};

// Fences
pub use fence::{Fence, FencePool, FencePoolStats, Signal};

// Recycling
pub use recycler::{MicroObjectRecycler, Recyclable, Recycled, RecyclerConfig, RecyclerStats};

// Deferred release
pub use garbage::{
    BindlessIndex, BindlessIndexAllocator, BufferGarbage, FrameGarbageCollector, GarbageStats,
    TextureGarbage,
};

// Memory
pub use memory::{
    GpuAllocation, GpuMemoryManager, MemoryLease, MemoryStats, MemoryUsage, PoolStats,
    SegregatedListsGpuMemoryPool, SegregatedPoolDesc, StackAllocation, StackGpuMemoryPool,
    StackPoolDesc, StackStats, TransientMemoryPool,
};

// Backends
pub use gpu::{BlockDesc, BufferUsage, FenceBackend, GpuError, HostBackend, MemoryBackend};

// Diagnostics
pub use diagnostics::{Diagnostic, DiagnosticKind, MemoryEvent, ProfilerHooks};
