//! Vulkan backend via the `ash` crate.
//!
//! Implements the fence and memory capabilities over `VkFence` and
//! `VkBuffer` + `VkDeviceMemory` pairs.

pub mod fence;
pub mod memory;

pub use fence::VulkanFenceBackend;
pub use memory::{VulkanBlock, VulkanMemoryBackend};

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::traits::{BlockDesc, FenceBackend, GpuError, MemoryBackend};

/// Both capabilities over one device, as a
/// [`GpuResourceContext`](crate::GpuResourceContext) needs them.
pub struct VulkanBackend {
    fences: VulkanFenceBackend,
    memory: VulkanMemoryBackend,
}

impl VulkanBackend {
    /// Fences and device memory on `device`; blocks use `required_flags`.
    pub fn new(
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        instance: &ash::Instance,
        required_flags: vk::MemoryPropertyFlags,
    ) -> Self {
        Self {
            fences: VulkanFenceBackend::new(device.clone()),
            memory: VulkanMemoryBackend::new(device, physical_device, instance, required_flags),
        }
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        self.fences.device()
    }
}

impl FenceBackend for VulkanBackend {
    type Native = vk::Fence;

    fn create_fence(&self) -> Result<vk::Fence, GpuError> {
        self.fences.create_fence()
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.destroy_fence(fence)
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool, GpuError> {
        self.fences.fence_status(fence)
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool, GpuError> {
        self.fences.wait_fence(fence, timeout)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        self.fences.reset_fence(fence)
    }
}

impl MemoryBackend for VulkanBackend {
    type Block = VulkanBlock;

    fn create_block(&self, desc: &BlockDesc<'_>) -> Result<VulkanBlock, GpuError> {
        self.memory.create_block(desc)
    }

    fn destroy_block(&self, block: VulkanBlock) {
        self.memory.destroy_block(block)
    }

    fn block_alignment(&self) -> u64 {
        self.memory.block_alignment()
    }
}

/// Map a Vulkan result code onto the backend error taxonomy.
pub(crate) fn map_vk_error(result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GpuError::OutOfDeviceMemory,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => GpuError::OutOfHostMemory,
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        other => GpuError::Backend(format!("{:?}", other)),
    }
}
