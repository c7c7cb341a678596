//! `VkFence` implementation of the fence capability.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::map_vk_error;
use crate::gpu::traits::{FenceBackend, GpuError};

/// Fence capability over a logical device.
pub struct VulkanFenceBackend {
    device: Arc<ash::Device>,
}

impl VulkanFenceBackend {
    /// Wrap a logical device.
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self { device }
    }

    /// The wrapped device.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }
}

impl FenceBackend for VulkanFenceBackend {
    type Native = vk::Fence;

    fn create_fence(&self) -> Result<vk::Fence, GpuError> {
        let info = vk::FenceCreateInfo::builder();
        // SAFETY: the device outlives this backend and the create info is valid
        let fence = unsafe { self.device.create_fence(&info, None) };
        fence.map_err(map_vk_error)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: the pool only destroys fences that no submission references
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool, GpuError> {
        // SAFETY: `fence` was created on this device and is not destroyed yet
        let status = unsafe { self.device.get_fence_status(fence) };
        status.map_err(map_vk_error)
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool, GpuError> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        // SAFETY: `fence` was created on this device and is not destroyed yet
        match unsafe { self.device.wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(map_vk_error(err)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        // SAFETY: the pool only resets fences it has observed signaled
        let reset = unsafe { self.device.reset_fences(&[fence]) };
        reset.map_err(map_vk_error)
    }
}
