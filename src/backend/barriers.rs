// Resource state tracking
//
// Every image the renderer touches has a current "execution state": the
// pipeline stage and access of its last use and the layout it is in.
// Passes declare the state they need with `set_state`; the tracker turns the
// difference into image memory barriers, batched until `flush`.
//
// States are tracked in recording order on a single queue, so a transition
// recorded for frame N+1 correctly waits on the use recorded in frame N even
// while frame N is still executing on the GPU.

use ash::vk;
use std::collections::HashMap;

/// Last use of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl ImageState {
    /// Contents are garbage, nothing to wait for
    pub const UNDEFINED: ImageState = ImageState {
        stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };

    /// Freshly acquired swapchain image. Its acquire semaphore is waited on at
    /// COLOR_ATTACHMENT_OUTPUT, so the first transition must start at that
    /// stage to chain after the wait.
    pub const ACQUIRED: ImageState = ImageState {
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };

    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self { stage, access, layout }
    }

    fn writes(&self) -> bool {
        const WRITES: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_WRITE.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
                | vk::AccessFlags2::HOST_WRITE.as_raw()
                | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
        );
        self.access.intersects(WRITES)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    from: ImageState,
    to: ImageState,
}

/// Tracks image states and accumulates the barriers between them
#[derive(Default)]
pub struct ResourceStates {
    current: HashMap<vk::Image, ImageState>,
    pending: Vec<PendingTransition>,
}

impl ResourceStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the state `image` must be in for its next use.
    ///
    /// Nothing is recorded until `flush`. Several requests for one image
    /// between flushes collapse into a single transition to the last one.
    pub fn set_state(
        &mut self,
        image: vk::Image,
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) {
        let to = ImageState::new(stage, access, layout);

        if let Some(pending) = self.pending.iter_mut().find(|p| p.image == image) {
            pending.to = to;
            pending.aspect = aspect;
            return;
        }

        let from = self.state_of(image);

        // Read after read in the same layout needs no barrier
        if from == to && !to.writes() {
            return;
        }

        self.pending.push(PendingTransition { image, aspect, from, to });
    }

    /// Current (last requested and flushed) state of an image
    pub fn state_of(&self, image: vk::Image) -> ImageState {
        self.current.get(&image).copied().unwrap_or(ImageState::UNDEFINED)
    }

    /// Record that `image` already is in `state` without emitting a barrier,
    /// e.g. after an upload that transitioned it by hand.
    pub fn assume_state(&mut self, image: vk::Image, state: ImageState) {
        self.current.insert(image, state);
    }

    /// Forget an image: its next transition starts from UNDEFINED and
    /// discards the contents. Used for freshly acquired swapchain images and
    /// for destroyed images whose handles may be reused.
    pub fn discard(&mut self, image: vk::Image) {
        self.current.remove(&image);
        self.pending.retain(|p| p.image != image);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain pending transitions into barriers and commit the new states
    pub fn take_barriers(&mut self) -> Vec<vk::ImageMemoryBarrier2> {
        let mut barriers = Vec::with_capacity(self.pending.len());

        for transition in self.pending.drain(..) {
            let barrier = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(transition.from.stage)
                .src_access_mask(transition.from.access)
                .dst_stage_mask(transition.to.stage)
                .dst_access_mask(transition.to.access)
                .old_layout(transition.from.layout)
                .new_layout(transition.to.layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(transition.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: transition.aspect,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                })
                .build();

            self.current.insert(transition.image, transition.to);
            barriers.push(barrier);
        }

        barriers
    }

    /// Record all pending transitions as one vkCmdPipelineBarrier2
    pub fn flush(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if !self.has_pending() {
            return;
        }

        let barriers = self.take_barriers();
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);

        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn image(raw: u64) -> vk::Image {
        vk::Image::from_raw(raw)
    }

    fn color_write(states: &mut ResourceStates, img: vk::Image) {
        states.set_state(
            img,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
    }

    fn shader_read(states: &mut ResourceStates, img: vk::Image) {
        states.set_state(
            img,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
    }

    #[test]
    fn test_unknown_image_starts_undefined() {
        let mut states = ResourceStates::new();
        let img = image(1);
        color_write(&mut states, img);

        let barriers = states.take_barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barriers[0].src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barriers[0].dst_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn test_nothing_recorded_before_flush() {
        let mut states = ResourceStates::new();
        let img = image(1);
        color_write(&mut states, img);

        assert!(states.has_pending());
        assert_eq!(states.state_of(img), ImageState::UNDEFINED);

        states.take_barriers();
        assert!(!states.has_pending());
        assert_eq!(states.state_of(img).layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_requests_collapse_until_flush() {
        let mut states = ResourceStates::new();
        let img = image(7);
        color_write(&mut states, img);
        states.take_barriers();

        shader_read(&mut states, img);
        states.set_state(
            img,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );

        let barriers = states.take_barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barriers[0].src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn test_repeated_read_is_free() {
        let mut states = ResourceStates::new();
        let img = image(3);
        shader_read(&mut states, img);
        assert_eq!(states.take_barriers().len(), 1);

        shader_read(&mut states, img);
        assert!(!states.has_pending());
    }

    #[test]
    fn test_repeated_write_still_synchronizes() {
        let mut states = ResourceStates::new();
        let img = image(3);
        color_write(&mut states, img);
        states.take_barriers();

        color_write(&mut states, img);
        let barriers = states.take_barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].old_layout, barriers[0].new_layout);
        assert_eq!(barriers[0].src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_write_after_read_across_frames() {
        // Offscreen target: sampled at the end of one frame, rendered at the
        // start of the next.
        let mut states = ResourceStates::new();
        let img = image(11);
        color_write(&mut states, img);
        shader_read(&mut states, img);
        states.take_barriers();

        color_write(&mut states, img);
        let barriers = states.take_barriers();
        assert_eq!(barriers[0].src_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_one_barrier_per_image() {
        let mut states = ResourceStates::new();
        let (a, b) = (image(1), image(2));
        color_write(&mut states, a);
        shader_read(&mut states, b);
        shader_read(&mut states, a);

        let barriers = states.take_barriers();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].image, a);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barriers[1].image, b);
    }

    #[test]
    fn test_discard_resets_to_undefined() {
        let mut states = ResourceStates::new();
        let img = image(5);
        color_write(&mut states, img);
        states.take_barriers();

        states.set_state(
            img,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageAspectFlags::COLOR,
        );
        states.discard(img);
        assert!(!states.has_pending());

        color_write(&mut states, img);
        let barriers = states.take_barriers();
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_acquired_image_chains_after_semaphore_wait() {
        let mut states = ResourceStates::new();
        let backbuffer = image(21);
        states.assume_state(backbuffer, ImageState::ACQUIRED);
        color_write(&mut states, backbuffer);

        let barriers = states.take_barriers();
        assert_eq!(barriers[0].src_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_assume_state_skips_barrier() {
        let mut states = ResourceStates::new();
        let img = image(9);
        states.assume_state(
            img,
            ImageState::new(
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        );
        shader_read(&mut states, img);
        assert!(!states.has_pending());
    }
}
