//! `VkDeviceMemory` implementation of the memory capability.
//!
//! Each block is one `VkBuffer` bound at offset 0 of its own allocation;
//! pools hand out offsets into that buffer.

use std::sync::Arc;

use ash::vk;

use super::map_vk_error;
use crate::gpu::traits::{BlockDesc, GpuError, MemoryBackend};

/// A buffer plus the memory bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanBlock {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

/// Memory capability over a logical device and one set of memory properties.
pub struct VulkanMemoryBackend {
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    required_flags: vk::MemoryPropertyFlags,
    alignment: u64,
}

impl VulkanMemoryBackend {
    /// Create a backend that allocates from memory types with `required_flags`.
    pub fn new(
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        instance: &ash::Instance,
        required_flags: vk::MemoryPropertyFlags,
    ) -> Self {
        // SAFETY: `physical_device` was enumerated from `instance`
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        // SAFETY: as above
        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;

        // Blocks are shared by every buffer kind, so honor the strictest offset rule.
        let alignment = limits
            .min_uniform_buffer_offset_alignment
            .max(limits.min_storage_buffer_offset_alignment)
            .max(limits.min_texel_buffer_offset_alignment)
            .max(limits.non_coherent_atom_size)
            .max(16);

        Self {
            device,
            memory_properties,
            required_flags,
            alignment,
        }
    }

    fn find_memory_type(&self, type_filter: u32) -> Result<u32, GpuError> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(i, mem_type)| {
                type_filter & (1 << i) != 0
                    && mem_type.property_flags.contains(self.required_flags)
            })
            .map(|(i, _)| i as u32)
            .ok_or_else(|| {
                GpuError::InvalidRequest(format!(
                    "no memory type with {:?} in filter {:#x}",
                    self.required_flags, type_filter
                ))
            })
    }
}

impl MemoryBackend for VulkanMemoryBackend {
    type Block = VulkanBlock;

    fn create_block(&self, desc: &BlockDesc<'_>) -> Result<VulkanBlock, GpuError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(vk::BufferUsageFlags::from_raw(desc.usage.bits))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: valid create info on a live device
        let buffer =
            unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(map_vk_error)?;

        // SAFETY: `buffer` was just created on this device
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match self.find_memory_type(requirements.memory_type_bits) {
            Ok(index) => index,
            Err(err) => {
                // SAFETY: the buffer is unused
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        // SAFETY: valid allocate info on a live device
        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                // SAFETY: the buffer is unused
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(map_vk_error(err));
            }
        };

        // SAFETY: memory was sized from the buffer's own requirements
        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            // SAFETY: neither object was ever used by the GPU
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(map_vk_error(err));
        }

        Ok(VulkanBlock {
            buffer,
            memory,
            size: desc.size,
        })
    }

    fn destroy_block(&self, block: VulkanBlock) {
        // SAFETY: pools only destroy blocks once every fence guarding them has signaled
        unsafe {
            self.device.destroy_buffer(block.buffer, None);
            self.device.free_memory(block.memory, None);
        }
    }

    fn block_alignment(&self) -> u64 {
        self.alignment
    }
}
