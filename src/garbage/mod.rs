//! Deferred release of GPU resources.
//!
//! Destroying a texture or buffer on the CPU does not mean the GPU is done
//! with it. Its native handles, bindless slots and memory go into a
//! [`FrameGarbageCollector`] bucket, which is sealed with the frame's fence
//! at `end_frame` and released only once that fence is observed done.
//!
//! ```rust,ignore
//! gc.new_buffer_garbage(BufferGarbage::new().with_buffer(move || unsafe {
//!     device.destroy_buffer(buffer, None)
//! }));
//! gc.end_frame(frame_fence);
//! ```

mod bindless;
mod collector;
mod items;

pub use bindless::{BindlessIndex, BindlessIndexAllocator};
pub use collector::{FrameGarbageCollector, GarbageStats, DEFAULT_MAX_PENDING_BUCKETS};
pub use items::{BufferGarbage, NativeRelease, TextureGarbage};
