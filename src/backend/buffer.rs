// Buffer utilities for uniform and staging buffers
//
// Memory comes from gpu-allocator; host-visible buffers stay mapped for
// their whole lifetime.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::{release_on_error, VulkanDevice};

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let allocation = release_on_error(
            buffer,
            |buffer| {
                let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

                let allocation = device
                    .allocator()
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .with_context(|| format!("Failed to allocate memory for buffer '{}'", name))?;

                let bound = unsafe {
                    device
                        .device
                        .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                };
                if let Err(e) = bound {
                    free_allocation(&device, allocation);
                    return Err(e)
                        .with_context(|| format!("Failed to bind memory for buffer '{}'", name));
                }

                Ok(allocation)
            },
            |buffer| unsafe { device.device.destroy_buffer(buffer, None) },
        )?;

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        })
    }

    /// Host-visible uniform buffer sized for one `T`
    pub fn uniform<T: bytemuck::Pod>(device: Arc<VulkanDevice>, name: &str) -> Result<Self> {
        Self::new(
            device,
            name,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )
    }

    /// Host-visible transfer source filled with `bytes`
    pub fn staging(device: Arc<VulkanDevice>, name: &str, bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write_bytes(bytes)?;
        Ok(buffer)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        anyhow::ensure!(
            bytes.len() <= mapped.len(),
            "Write of {} bytes overflows buffer of {} bytes",
            bytes.len(),
            mapped.len()
        );
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            free_allocation(&self.device, allocation);
        }
    }
}

/// Return `allocation` to the device allocator, logging failures
pub(super) fn free_allocation(device: &VulkanDevice, allocation: Allocation) {
    if let Err(e) = device.allocator().free(allocation) {
        log::error!("Failed to free GPU memory: {}", e);
    }
}
