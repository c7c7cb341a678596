//! Resource context configuration.

use std::time::Duration;

use crate::memory::DEFAULT_CLASSES;
use crate::util::size::{kb, mb};

/// Configuration for a [`GpuResourceContext`](super::GpuResourceContext).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfig {
    /// Hard cap on native fences (default: 32)
    pub fence_pool_cap: usize,

    /// How long any fence wait may block before it is treated as a hang
    /// (default: 10 s)
    pub fence_wait_timeout: Duration,

    /// Requests per recycler keep-alive adjustment (default: 128)
    pub recycler_adjust_window: u32,

    /// Soft cap on cached objects per recycler
    pub recycler_max_cached: usize,

    /// Size classes for the general-purpose pools
    pub segregated_classes: Vec<u64>,

    /// Target chunk size for the general-purpose pools (default: 4 MB)
    pub segregated_pool_size: u64,

    /// Fully free chunks kept per size class (default: 1)
    pub spare_chunks_per_class: usize,

    /// First transient chunk (default: 256 KB)
    pub stack_initial_chunk: u64,

    /// Transient growth: `previous * scale + bias`
    pub stack_scale: f64,
    pub stack_bias: u64,

    /// Largest transient chunk and largest single transient allocation
    pub stack_max_chunk: u64,

    /// Frames the CPU may run ahead of the GPU (default: 3)
    pub frames_in_flight: usize,

    /// Sealed garbage buckets before a warning is raised
    pub max_pending_garbage_frames: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            fence_pool_cap: 32,
            fence_wait_timeout: Duration::from_secs(10),
            recycler_adjust_window: 128,
            recycler_max_cached: 64,
            segregated_classes: DEFAULT_CLASSES.to_vec(),
            segregated_pool_size: mb(4),
            spare_chunks_per_class: 1,
            stack_initial_chunk: kb(256),
            stack_scale: 2.0,
            stack_bias: 0,
            stack_max_chunk: mb(64),
            frames_in_flight: 3,
            max_pending_garbage_frames: 16,
        }
    }
}

impl ResourceConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            fence_pool_cap: 8,
            fence_wait_timeout: Duration::from_secs(1),
            recycler_adjust_window: 32,
            recycler_max_cached: 8,
            segregated_classes: vec![256, kb(1), kb(4), kb(16)],
            segregated_pool_size: kb(64),
            spare_chunks_per_class: 0,
            stack_initial_chunk: kb(16),
            stack_scale: 2.0,
            stack_bias: 0,
            stack_max_chunk: mb(1),
            frames_in_flight: 2,
            max_pending_garbage_frames: 4,
        }
    }

    /// Create a config for heavy streaming workloads.
    pub fn high_performance() -> Self {
        Self {
            fence_pool_cap: 64,
            fence_wait_timeout: Duration::from_secs(10),
            recycler_adjust_window: 256,
            recycler_max_cached: 256,
            segregated_classes: vec![256, kb(1), kb(4), kb(16), kb(64), kb(256), mb(1), mb(4)],
            segregated_pool_size: mb(16),
            spare_chunks_per_class: 2,
            stack_initial_chunk: mb(4),
            stack_scale: 1.5,
            stack_bias: mb(1),
            stack_max_chunk: mb(256),
            frames_in_flight: 3,
            max_pending_garbage_frames: 16,
        }
    }

    /// Builder pattern: set the fence cap.
    pub fn with_fence_pool_cap(mut self, cap: usize) -> Self {
        self.fence_pool_cap = cap;
        self
    }

    /// Builder pattern: set the fence wait timeout.
    pub fn with_fence_wait_timeout(mut self, timeout: Duration) -> Self {
        self.fence_wait_timeout = timeout;
        self
    }

    /// Builder pattern: set the general-purpose size classes.
    pub fn with_segregated_classes(mut self, classes: impl Into<Vec<u64>>) -> Self {
        self.segregated_classes = classes.into();
        self
    }

    /// Builder pattern: set the general-purpose chunk size.
    pub fn with_segregated_pool_size(mut self, size: u64) -> Self {
        self.segregated_pool_size = size;
        self
    }

    /// Builder pattern: set transient chunk growth.
    pub fn with_stack_growth(mut self, initial: u64, scale: f64, bias: u64) -> Self {
        self.stack_initial_chunk = initial;
        self.stack_scale = scale;
        self.stack_bias = bias;
        self
    }

    /// Builder pattern: set the largest transient chunk.
    pub fn with_stack_max_chunk(mut self, size: u64) -> Self {
        self.stack_max_chunk = size;
        self
    }

    /// Builder pattern: set frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_consistent() {
        for config in [
            ResourceConfig::default(),
            ResourceConfig::minimal(),
            ResourceConfig::high_performance(),
        ] {
            let largest = *config.segregated_classes.last().unwrap();
            assert!(largest <= config.segregated_pool_size);
            assert!(config.segregated_classes.windows(2).all(|pair| pair[0] < pair[1]));
            assert!(config.stack_initial_chunk <= config.stack_max_chunk);
            assert!(config.frames_in_flight >= 1);
        }
    }

    #[test]
    fn test_builders() {
        let config = ResourceConfig::minimal()
            .with_fence_pool_cap(4)
            .with_frames_in_flight(1)
            .with_stack_growth(kb(1), 2.0, 256);
        assert_eq!(config.fence_pool_cap, 4);
        assert_eq!(config.frames_in_flight, 1);
        assert_eq!(config.stack_bias, 256);
    }
}
