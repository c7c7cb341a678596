//! GPU timeline fences.
//!
//! A [`Fence`] marks a point on the GPU timeline. Fences come from a
//! [`FencePool`], which caps how many native fences exist and recycles
//! released ones once the GPU has passed them.
//!
//! Everything that defers work until the GPU is done (recyclers, garbage
//! collection, transient memory) is written against the [`Signal`] trait
//! rather than a concrete fence type.

mod pool;
#[cfg(test)]
pub(crate) mod testing;

pub use pool::{Fence, FencePool, FencePoolStats};

use std::sync::Arc;
use std::time::Duration;

/// A point on the GPU timeline that the CPU can poll or block on.
///
/// Implementations must be monotonic: once `done` returns `true` it keeps
/// returning `true`.
pub trait Signal: Send + Sync {
    /// Non-blocking: has the GPU passed this point?
    fn done(&self) -> bool;

    /// Block up to `timeout`. Returns whether the point was reached.
    fn wait(&self, timeout: Duration) -> bool;
}

impl<S: Signal + ?Sized> Signal for Arc<S> {
    fn done(&self) -> bool {
        (**self).done()
    }

    fn wait(&self, timeout: Duration) -> bool {
        (**self).wait(timeout)
    }
}

impl<S: Signal + ?Sized> Signal for Box<S> {
    fn done(&self) -> bool {
        (**self).done()
    }

    fn wait(&self, timeout: Duration) -> bool {
        (**self).wait(timeout)
    }
}
