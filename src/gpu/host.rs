//! Host backend: software fences and bookkeeping-only memory blocks.
//!
//! Used by tests, benches and headless tools. Fences are signaled by the
//! caller (standing in for the GPU queue), either directly or after a
//! number of status polls. Blocks carry no bytes; they only account sizes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::traits::{BlockDesc, BufferUsage, FenceBackend, GpuError, MemoryBackend};
use crate::sync::mutex::{wait_until, Condvar, Mutex};

/// Native handle of a host fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostFence(u64);

impl HostFence {
    /// Raw id, for logging.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct HostFenceState {
    signaled: bool,
    /// Signal automatically once this many more status polls have happened.
    polls_left: Option<u32>,
}

/// A block of host "device memory".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlock {
    pub id: u64,
    pub size: u64,
    pub usage: BufferUsage,
    pub linear_only: bool,
}

/// Software implementation of both backend capabilities.
#[derive(Debug)]
pub struct HostBackend {
    fences: Mutex<HashMap<u64, HostFenceState>>,
    signaled: Condvar,
    next_id: AtomicU64,
    blocks_live: AtomicUsize,
    block_bytes_live: AtomicU64,
    blocks_created: AtomicU64,
    fences_created: AtomicU64,
    fail_fences: AtomicBool,
    fail_blocks: AtomicBool,
    alignment: u64,
}

impl HostBackend {
    /// Create a host backend with 256-byte block alignment.
    pub fn new() -> Self {
        Self::with_alignment(256)
    }

    /// Create a host backend reporting the given block alignment.
    pub fn with_alignment(alignment: u64) -> Self {
        crate::gr_check!(
            alignment.is_power_of_two(),
            GR305,
            "host backend block alignment {} is not a power of two",
            alignment
        );
        Self {
            fences: Mutex::new(HashMap::new()),
            signaled: Condvar::new(),
            next_id: AtomicU64::new(1),
            blocks_live: AtomicUsize::new(0),
            block_bytes_live: AtomicU64::new(0),
            blocks_created: AtomicU64::new(0),
            fences_created: AtomicU64::new(0),
            fail_fences: AtomicBool::new(false),
            fail_blocks: AtomicBool::new(false),
            alignment,
        }
    }

    /// Convenience constructor returning an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Signal a fence, as the GPU would on reaching it.
    pub fn signal(&self, fence: HostFence) {
        let mut fences = self.fences.lock();
        if let Some(state) = fences.get_mut(&fence.0) {
            state.signaled = true;
            state.polls_left = None;
        }
        drop(fences);
        self.signaled.notify_all();
    }

    /// Signal a fence after `polls` more status queries.
    pub fn signal_after_polls(&self, fence: HostFence, polls: u32) {
        let mut fences = self.fences.lock();
        if let Some(state) = fences.get_mut(&fence.0) {
            state.polls_left = Some(polls);
        }
    }

    /// Signal every live fence (a `device_wait_idle` stand-in).
    pub fn signal_all(&self) {
        let mut fences = self.fences.lock();
        for state in fences.values_mut() {
            state.signaled = true;
            state.polls_left = None;
        }
        drop(fences);
        self.signaled.notify_all();
    }

    /// Make subsequent fence creation fail.
    pub fn fail_fence_creation(&self, fail: bool) {
        self.fail_fences.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent block creation fail with `OutOfDeviceMemory`.
    pub fn fail_block_creation(&self, fail: bool) {
        self.fail_blocks.store(fail, Ordering::Relaxed);
    }

    /// Fences currently created and not destroyed.
    pub fn live_fences(&self) -> usize {
        self.fences.lock().len()
    }

    /// Total fences ever created.
    pub fn fences_created(&self) -> u64 {
        self.fences_created.load(Ordering::Relaxed)
    }

    /// Blocks currently created and not destroyed.
    pub fn live_blocks(&self) -> usize {
        self.blocks_live.load(Ordering::Relaxed)
    }

    /// Bytes in live blocks.
    pub fn live_block_bytes(&self) -> u64 {
        self.block_bytes_live.load(Ordering::Relaxed)
    }

    /// Total blocks ever created.
    pub fn blocks_created(&self) -> u64 {
        self.blocks_created.load(Ordering::Relaxed)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceBackend for HostBackend {
    type Native = HostFence;

    fn create_fence(&self) -> Result<HostFence, GpuError> {
        if self.fail_fences.load(Ordering::Relaxed) {
            return Err(GpuError::OutOfHostMemory);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.fences.lock().insert(id, HostFenceState::default());
        self.fences_created.fetch_add(1, Ordering::Relaxed);
        Ok(HostFence(id))
    }

    fn destroy_fence(&self, fence: HostFence) {
        self.fences.lock().remove(&fence.0);
    }

    fn fence_status(&self, fence: HostFence) -> Result<bool, GpuError> {
        let mut fences = self.fences.lock();
        let state = fences
            .get_mut(&fence.0)
            .ok_or_else(|| GpuError::InvalidRequest(format!("unknown fence {}", fence.0)))?;

        if let Some(left) = state.polls_left {
            if left == 0 {
                state.signaled = true;
                state.polls_left = None;
            } else {
                state.polls_left = Some(left - 1);
            }
        }
        Ok(state.signaled)
    }

    fn wait_fence(&self, fence: HostFence, timeout: Duration) -> Result<bool, GpuError> {
        let mut fences = self.fences.lock();
        if !fences.contains_key(&fence.0) {
            return Err(GpuError::InvalidRequest(format!("unknown fence {}", fence.0)));
        }
        Ok(wait_until(&self.signaled, &mut fences, timeout, |fences| {
            fences.get(&fence.0).map_or(true, |state| state.signaled)
        }))
    }

    fn reset_fence(&self, fence: HostFence) -> Result<(), GpuError> {
        let mut fences = self.fences.lock();
        let state = fences
            .get_mut(&fence.0)
            .ok_or_else(|| GpuError::InvalidRequest(format!("unknown fence {}", fence.0)))?;
        *state = HostFenceState::default();
        Ok(())
    }
}

impl MemoryBackend for HostBackend {
    type Block = HostBlock;

    fn create_block(&self, desc: &BlockDesc<'_>) -> Result<HostBlock, GpuError> {
        if desc.size == 0 {
            return Err(GpuError::InvalidRequest("zero-sized block".into()));
        }
        if self.fail_blocks.load(Ordering::Relaxed) {
            return Err(GpuError::OutOfDeviceMemory);
        }

        self.blocks_live.fetch_add(1, Ordering::Relaxed);
        self.block_bytes_live.fetch_add(desc.size, Ordering::Relaxed);
        self.blocks_created.fetch_add(1, Ordering::Relaxed);

        Ok(HostBlock {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            size: desc.size,
            usage: desc.usage,
            linear_only: desc.linear_only,
        })
    }

    fn destroy_block(&self, block: HostBlock) {
        self.blocks_live.fetch_sub(1, Ordering::Relaxed);
        self.block_bytes_live.fetch_sub(block.size, Ordering::Relaxed);
    }

    fn block_alignment(&self) -> u64 {
        self.alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output() {
        let backend = HostBackend::with_alignment(512);
        let text = format!("{:?}", backend);
        assert!(text.contains("HostBackend"));
        assert!(text.contains("512"));
    }

    #[test]
    #[should_panic(expected = "GR305")]
    fn test_alignment_must_be_power_of_two() {
        let _ = HostBackend::with_alignment(3);
    }

    #[test]
    fn test_fence_signal_and_reset() {
        let backend = HostBackend::new();
        let fence = backend.create_fence().unwrap();

        assert!(!backend.fence_status(fence).unwrap());
        backend.signal(fence);
        assert!(backend.fence_status(fence).unwrap());

        backend.reset_fence(fence).unwrap();
        assert!(!backend.fence_status(fence).unwrap());

        backend.destroy_fence(fence);
        assert_eq!(backend.live_fences(), 0);
        assert!(backend.fence_status(fence).is_err());
    }

    #[test]
    fn test_signal_after_polls() {
        let backend = HostBackend::new();
        let fence = backend.create_fence().unwrap();
        backend.signal_after_polls(fence, 2);

        assert!(!backend.fence_status(fence).unwrap());
        assert!(!backend.fence_status(fence).unwrap());
        assert!(backend.fence_status(fence).unwrap());
    }

    #[test]
    fn test_wait_times_out_then_succeeds() {
        let backend = Arc::new(HostBackend::new());
        let fence = backend.create_fence().unwrap();

        assert!(!backend.wait_fence(fence, Duration::from_millis(5)).unwrap());

        let signaller = backend.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            signaller.signal(fence);
        });
        assert!(backend.wait_fence(fence, Duration::from_secs(5)).unwrap());
        handle.join().expect("Thread panicked");
    }

    #[test]
    fn test_block_accounting() {
        let backend = HostBackend::new();
        let desc = BlockDesc {
            size: 4096,
            usage: BufferUsage::VERTEX_BUFFER,
            linear_only: true,
            name: "test",
        };
        let block = backend.create_block(&desc).unwrap();
        assert_eq!(backend.live_blocks(), 1);
        assert_eq!(backend.live_block_bytes(), 4096);

        backend.destroy_block(block);
        assert_eq!(backend.live_blocks(), 0);

        backend.fail_block_creation(true);
        assert_eq!(backend.create_block(&desc), Err(GpuError::OutOfDeviceMemory));
    }
}
