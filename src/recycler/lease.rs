//! RAII handle for recycled objects.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{MicroObjectRecycler, Recyclable};

/// An object borrowed from a [`MicroObjectRecycler`].
///
/// Dropping the lease returns the object to its recycler. Call
/// [`retire`](Self::retire) instead when the GPU still uses it.
pub struct Recycled<T: Recyclable> {
    object: Option<T>,
    recycler: Arc<MicroObjectRecycler<T>>,
}

impl<T: Recyclable> MicroObjectRecycler<T> {
    /// Reuse a ready object or create one with `create`, wrapped in a lease.
    pub fn acquire_with(self: &Arc<Self>, create: impl FnOnce() -> T) -> Recycled<T> {
        let object = self.find_to_reuse().unwrap_or_else(create);
        Recycled {
            object: Some(object),
            recycler: Arc::clone(self),
        }
    }
}

impl<T: Recyclable> Recycled<T> {
    /// Return the object with the fence of its last GPU use.
    pub fn retire(mut self, fence: T::Fence) {
        if let Some(mut object) = self.object.take() {
            object.set_fence(Some(fence));
            self.recycler.recycle(object);
        }
    }

    /// Take the object out of the recycler's care.
    pub fn detach(mut self) -> T {
        match self.object.take() {
            Some(object) => object,
            None => unreachable!("lease emptied before drop"),
        }
    }

    /// The recycler this lease returns to.
    pub fn recycler(&self) -> &Arc<MicroObjectRecycler<T>> {
        &self.recycler
    }
}

impl<T: Recyclable> Deref for Recycled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.object {
            Some(object) => object,
            None => unreachable!("lease emptied before drop"),
        }
    }
}

impl<T: Recyclable> DerefMut for Recycled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.object {
            Some(object) => object,
            None => unreachable!("lease emptied before drop"),
        }
    }
}

impl<T: Recyclable> Drop for Recycled<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.recycler.recycle(object);
        }
    }
}
