//! Profiler integration.
//!
//! When the `tracy` feature is enabled, frame marks and pool usage plots go
//! straight to Tracy. A [`ProfilerHooks`] callback receives the same events
//! for custom overlays.

#[cfg(feature = "tracy")]
pub use tracy_client;

/// Event reported to profilers.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryEvent {
    /// A frame boundary was processed.
    FrameMark {
        frame_number: u64,
    },
    /// Usage snapshot of one memory pool.
    PoolUsage {
        name: String,
        used_bytes: u64,
        total_bytes: u64,
    },
    /// Garbage still waiting on fences after a collection pass.
    PendingGarbage {
        items: usize,
    },
    /// A thread blocked on a fence.
    FenceWait {
        micros: u64,
    },
}

/// Callback type for external profiler integration.
pub type ProfilerCallback = Box<dyn Fn(&MemoryEvent) + Send + Sync>;

/// Profiler hooks for external tools.
#[derive(Default)]
pub struct ProfilerHooks {
    callback: Option<ProfilerCallback>,
}

impl ProfilerHooks {
    /// Create new profiler hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the profiler callback.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Check if a callback is installed.
    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Report an event to Tracy (if enabled) and the callback (if set).
    pub fn emit(&self, event: MemoryEvent) {
        #[cfg(feature = "tracy")]
        forward_to_tracy(&event);

        if let Some(ref callback) = self.callback {
            callback(&event);
        }
    }
}

impl std::fmt::Debug for ProfilerHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerHooks")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(feature = "tracy")]
fn forward_to_tracy(event: &MemoryEvent) {
    match event {
        MemoryEvent::FrameMark { .. } => tracy_client::frame_mark(),
        MemoryEvent::PoolUsage { used_bytes, .. } => {
            tracy_client::plot!("fencealloc pool used bytes", *used_bytes as f64);
        }
        MemoryEvent::PendingGarbage { items } => {
            tracy_client::plot!("fencealloc pending garbage", *items as f64);
        }
        MemoryEvent::FenceWait { micros } => {
            tracy_client::plot!("fencealloc fence wait us", *micros as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_callback_receives_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let mut hooks = ProfilerHooks::new();
        assert!(!hooks.is_enabled());
        hooks.set_callback(move |event| {
            if matches!(event, MemoryEvent::FrameMark { .. }) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        hooks.emit(MemoryEvent::FrameMark { frame_number: 1 });
        hooks.emit(MemoryEvent::PendingGarbage { items: 3 });
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
