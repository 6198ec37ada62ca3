// Frames in flight
//
// The CPU records frame N+1 while the GPU still executes frame N. Each frame
// in flight owns a slot: a command pool + buffer, a fence signaled when the
// GPU finishes the slot's last submission, an image-available semaphore for
// swapchain acquisition and a descriptor pool for transient sets.
//
// FRAME TIMELINE (3 slots):
// ┌──────────────────────────────────────────────────────────────────────┐
// │ CPU: rec 0 │ rec 1 │ rec 2 │ wait(0) rec 0 │ wait(1) rec 1 │ ...     │
// │ GPU:        │ exec 0 │ exec 1 │ exec 2     │ exec 0        │ ...     │
// └──────────────────────────────────────────────────────────────────────┘

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::sync::{create_fence, create_semaphore};
use super::VulkanDevice;

/// Descriptor budget for one slot's transient sets
const DESCRIPTOR_SETS_PER_FRAME: u32 = 16;

/// Ring arithmetic for frame slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    slot_count: usize,
    index: usize,
    frame_number: u64,
}

impl FrameCounter {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count: slot_count.max(1),
            index: 0,
            frame_number: 0,
        }
    }

    /// Slot the next frame records into
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.slot_count;
        self.frame_number += 1;
    }
}

/// Per-slot objects
struct FrameSlot {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    in_flight: vk::Fence,
    image_available: vk::Semaphore,
    descriptor_pool: vk::DescriptorPool,
}

impl FrameSlot {
    fn new(device: &VulkanDevice) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            // TRANSIENT: Command buffers are re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create frame command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate frame command buffer")?[0];

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: DESCRIPTOR_SETS_PER_FRAME * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTOR_SETS_PER_FRAME * 2,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(DESCRIPTOR_SETS_PER_FRAME)
            .pool_sizes(&pool_sizes);
        let descriptor_pool =
            unsafe { device.device.create_descriptor_pool(&descriptor_pool_info, None) }
                .context("Failed to create frame descriptor pool")?;

        Ok(Self {
            command_pool,
            command_buffer,
            // Signaled: the first wait on a fresh slot returns immediately
            in_flight: create_fence(device, true)?,
            image_available: create_semaphore(device)?,
            descriptor_pool,
        })
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Handle to the slot being recorded
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub slot: usize,
    pub frame_number: u64,
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub descriptor_pool: vk::DescriptorPool,
}

/// Per-frame command manager
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    counter: FrameCounter,
    wait_stages: [vk::PipelineStageFlags; 1],
    device: Arc<VulkanDevice>,
}

impl FrameRing {
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> Result<Self> {
        let counter = FrameCounter::new(frames_in_flight);
        let slots = (0..counter.slot_count())
            .map(|_| FrameSlot::new(&device))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Created {} frames in flight", slots.len());

        Ok(Self {
            slots,
            counter,
            // The only thing the submission waits for is the acquired image,
            // and the first write to it is the color attachment output.
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            device,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Wait until the current slot's previous submission retired and recycle
    /// its command buffer and descriptor pool.
    ///
    /// The fence is not reset here: if the frame gets skipped, it must stay
    /// signaled so the next wait does not deadlock.
    pub fn begin_frame(&mut self) -> Result<FrameContext> {
        let slot = &self.slots[self.counter.index()];
        let device = &self.device.device;

        unsafe {
            device
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
                .context("Failed to wait for frame fence")?;
            device
                .reset_command_pool(slot.command_pool, vk::CommandPoolResetFlags::empty())
                .context("Failed to reset frame command pool")?;
            device
                .reset_descriptor_pool(slot.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .context("Failed to reset frame descriptor pool")?;
        }

        Ok(FrameContext {
            slot: self.counter.index(),
            frame_number: self.counter.frame_number(),
            command_buffer: slot.command_buffer,
            image_available: slot.image_available,
            descriptor_pool: slot.descriptor_pool,
        })
    }

    /// Submit the slot's command buffer. It starts once `image_available`
    /// fires, signals `signal` and the slot fence when done.
    ///
    /// On failure the slot fence is left signaled and the ring stays on this
    /// slot, so the next `begin_frame` does not block.
    pub fn submit(&mut self, frame: &FrameContext, signal: vk::Semaphore) -> Result<()> {
        let slot = &mut self.slots[frame.slot];
        let fence = slot.in_flight;
        let device = &self.device;

        let wait_semaphores = [slot.image_available];
        let signal_semaphores = [signal];
        let command_buffers = [slot.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        submit_slot(
            &mut self.counter,
            || {
                unsafe { device.device.reset_fences(&[fence]) }.context("Failed to reset frame fence")
            },
            || {
                unsafe { device.device.queue_submit(device.graphics_queue, &[submit_info], fence) }
                    .context("Failed to submit frame")
            },
            || {
                slot.in_flight = replace_fence(device, fence)?;
                Ok(())
            },
        )
    }

    /// The frame produced nothing; the slot is reused by the next frame
    pub fn skip(&self, frame: &FrameContext) {
        log::trace!("Skipping frame {} (slot {})", frame.frame_number, frame.slot);
    }

    /// Give up on a frame whose swapchain image was acquired but never
    /// submitted. The pending `image_available` signal is consumed by an
    /// empty submission so the semaphore can be used for the next acquire.
    /// The acquired image is never presented; the caller must recreate the
    /// swapchain.
    pub fn abandon(&mut self, frame: &FrameContext) -> Result<()> {
        let slot = &mut self.slots[frame.slot];
        let device = &self.device;
        log::warn!("Abandoning frame {} (slot {})", frame.frame_number, frame.slot);

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let drain = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        let drained = unsafe {
            device
                .device
                .reset_fences(&[slot.in_flight])
                .and_then(|()| device.device.queue_submit(device.graphics_queue, &[drain], slot.in_flight))
        };
        if drained.is_ok() {
            return Ok(());
        }

        // The queue refuses work: start the slot over with fresh objects
        device.wait_idle()?;
        slot.in_flight = replace_fence(device, slot.in_flight)?;
        let semaphore = create_semaphore(device)?;
        unsafe { device.device.destroy_semaphore(slot.image_available, None) };
        slot.image_available = semaphore;
        Ok(())
    }
}

/// Reset the slot fence, submit, advance the ring. A failed submission
/// signals nothing, so `restore` must leave the slot fence signaled again;
/// the ring does not advance.
fn submit_slot(
    counter: &mut FrameCounter,
    reset: impl FnOnce() -> Result<()>,
    submit: impl FnOnce() -> Result<()>,
    restore: impl FnOnce() -> Result<()>,
) -> Result<()> {
    reset()?;
    if let Err(e) = submit() {
        if let Err(restore_err) = restore() {
            log::error!("Failed to restore frame fence: {:#}", restore_err);
        }
        return Err(e);
    }
    counter.advance();
    Ok(())
}

/// Swap an unsignaled, idle fence for a new signaled one
fn replace_fence(device: &VulkanDevice, old: vk::Fence) -> Result<vk::Fence> {
    let fence = create_fence(device, true)?;
    unsafe { device.device.destroy_fence(old, None) };
    Ok(fence)
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        for slot in &self.slots {
            slot.destroy(&self.device.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_cycles_through_slots() {
        let mut counter = FrameCounter::new(3);
        let visited: Vec<usize> = (0..7)
            .map(|_| {
                let index = counter.index();
                counter.advance();
                index
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_number(), 7);
    }

    #[test]
    fn test_counter_single_slot() {
        let mut counter = FrameCounter::new(1);
        counter.advance();
        counter.advance();
        assert_eq!(counter.index(), 0);
        assert_eq!(counter.frame_number(), 2);
    }

    #[test]
    fn test_failed_submit_restores_fence_and_keeps_slot() {
        let mut counter = FrameCounter::new(3);
        let calls = std::cell::RefCell::new(Vec::new());

        let result = submit_slot(
            &mut counter,
            || Ok(calls.borrow_mut().push("reset")),
            || {
                calls.borrow_mut().push("submit");
                anyhow::bail!("device lost")
            },
            || Ok(calls.borrow_mut().push("restore")),
        );

        assert!(result.is_err());
        assert_eq!(*calls.borrow(), vec!["reset", "submit", "restore"]);
        assert_eq!(counter.index(), 0);
        assert_eq!(counter.frame_number(), 0);
    }

    #[test]
    fn test_successful_submit_advances() {
        let mut counter = FrameCounter::new(3);
        let restored = std::cell::Cell::new(false);

        submit_slot(&mut counter, || Ok(()), || Ok(()), || Ok(restored.set(true))).unwrap();

        assert!(!restored.get());
        assert_eq!(counter.index(), 1);
        assert_eq!(counter.frame_number(), 1);
    }

    #[test]
    fn test_failed_reset_skips_submit() {
        let mut counter = FrameCounter::new(2);
        let submitted = std::cell::Cell::new(false);

        let result = submit_slot(
            &mut counter,
            || anyhow::bail!("reset failed"),
            || Ok(submitted.set(true)),
            || Ok(()),
        );

        assert!(result.is_err());
        assert!(!submitted.get());
        assert_eq!(counter.index(), 0);
    }

    #[test]
    fn test_counter_never_empty() {
        let counter = FrameCounter::new(0);
        assert_eq!(counter.slot_count(), 1);
        assert_eq!(counter.index(), 0);
    }
}
