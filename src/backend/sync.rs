// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .context("Failed to create semaphore")
}

/// `signaled` fences let the first wait on them return immediately
pub fn create_fence(device: &VulkanDevice, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::builder().flags(flags);
    unsafe { device.device.create_fence(&fence_info, None) }.context("Failed to create fence")
}
