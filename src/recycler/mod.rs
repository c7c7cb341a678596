//! Micro-object recycling.
//!
//! Native driver objects such as samplers, query pools and swapchain image
//! sets are slow to create and cheap to reuse. A [`MicroObjectRecycler`]
//! keeps retired objects around and hands them out again once the fence
//! attached at retirement has signaled.

mod lease;
mod pool;

pub use lease::Recycled;
pub use pool::{MicroObjectRecycler, RecyclerConfig, RecyclerStats};

use crate::fence::Signal;

/// A pooled driver object.
///
/// The object's fence is `None` while in use and set when the object is
/// retired; it is eligible for reuse once that fence is done.
pub trait Recyclable: Send + 'static {
    /// Fence type guarding the object's last GPU use.
    type Fence: Signal;

    /// Fence attached at retirement, if any.
    fn fence(&self) -> Option<&Self::Fence>;

    /// Attach or clear the fence.
    fn set_fence(&mut self, fence: Option<Self::Fence>);

    /// Called right before the object is handed out again.
    fn on_reuse(&mut self) {}
}
