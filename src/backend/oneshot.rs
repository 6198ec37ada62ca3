// One-shot command submission
//
// For setup work (uploads) that must finish before the frame loop uses the
// result. Records, submits and blocks on a fence.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::sync::create_fence;
use super::VulkanDevice;

pub struct OneShotCommands {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl OneShotCommands {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create one-shot command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-shot command buffer")?[0];

        let fence = create_fence(&device, false)?;

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            device,
        })
    }

    /// Record with `record`, submit, and wait for the GPU to finish
    pub fn run<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = &self.device.device;
        let cmd = self.command_buffer;

        unsafe {
            device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .context("Failed to reset one-shot command pool")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        record(device, cmd)?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            device.end_command_buffer(cmd)?;
            device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], self.fence)
                .context("Failed to submit one-shot commands")?;
            device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .context("Failed to wait for one-shot commands")?;
            device.reset_fences(&[self.fence])?;
        }

        Ok(())
    }
}

impl Drop for OneShotCommands {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
