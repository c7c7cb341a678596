//! Garbage payloads.
//!
//! Each item owns whatever must outlive the GPU's last use of a destroyed
//! resource. Dropping the item releases it all; the collector only decides
//! *when* that drop happens.

use std::fmt;

use super::bindless::BindlessIndex;

/// Deferred native destruction, e.g. `vkDestroyImageView` on a captured handle.
pub type NativeRelease = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Payload {
    views: Vec<NativeRelease>,
    bindless: Vec<BindlessIndex>,
    resource: Option<NativeRelease>,
    memory: Vec<Box<dyn Send>>,
}

impl Payload {
    fn release(&mut self) {
        // Views reference the resource, the resource references the memory.
        for view in self.views.drain(..) {
            view();
        }
        self.bindless.clear();
        if let Some(resource) = self.resource.take() {
            resource();
        }
        self.memory.clear();
    }
}

/// What is left of a destroyed texture.
#[derive(Default)]
pub struct TextureGarbage {
    payload: Payload,
}

impl TextureGarbage {
    /// Empty item; fill it with the builder methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy the image itself.
    pub fn with_image(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.payload.resource = Some(Box::new(release));
        self
    }

    /// Destroy an image view. Views are released before the image.
    pub fn with_view(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.payload.views.push(Box::new(release));
        self
    }

    /// Keep a bindless slot claimed until collection.
    pub fn with_bindless(mut self, index: BindlessIndex) -> Self {
        self.payload.bindless.push(index);
        self
    }

    /// Keep a memory allocation (usually a `MemoryLease`) alive until collection.
    pub fn with_memory(mut self, memory: impl Send + 'static) -> Self {
        self.payload.memory.push(Box::new(memory));
        self
    }
}

impl Drop for TextureGarbage {
    fn drop(&mut self) {
        self.payload.release();
    }
}

impl fmt::Debug for TextureGarbage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureGarbage")
            .field("views", &self.payload.views.len())
            .field("bindless", &self.payload.bindless)
            .field("memory", &self.payload.memory.len())
            .finish()
    }
}

/// What is left of a destroyed buffer.
#[derive(Default)]
pub struct BufferGarbage {
    payload: Payload,
}

impl BufferGarbage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy the native buffer.
    pub fn with_buffer(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.payload.resource = Some(Box::new(release));
        self
    }

    /// Destroy a texel buffer view.
    pub fn with_view(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.payload.views.push(Box::new(release));
        self
    }

    pub fn with_bindless(mut self, index: BindlessIndex) -> Self {
        self.payload.bindless.push(index);
        self
    }

    /// Keep a memory allocation alive until collection.
    pub fn with_memory(mut self, memory: impl Send + 'static) -> Self {
        self.payload.memory.push(Box::new(memory));
        self
    }
}

impl Drop for BufferGarbage {
    fn drop(&mut self) {
        self.payload.release();
    }
}

impl fmt::Debug for BufferGarbage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGarbage")
            .field("views", &self.payload.views.len())
            .field("bindless", &self.payload.bindless)
            .field("memory", &self.payload.memory.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mutex::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_views_released_before_image() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (order.clone(), order.clone(), order.clone());

        let garbage = TextureGarbage::new()
            .with_image(move || a.lock().push("image"))
            .with_view(move || b.lock().push("view0"))
            .with_view(move || c.lock().push("view1"));
        assert!(order.lock().is_empty());

        drop(garbage);
        assert_eq!(*order.lock(), vec!["view0", "view1", "image"]);
    }
}
