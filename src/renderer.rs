// =============================================================================
// SHADERTOY RENDERER
// =============================================================================
//
// Two passes per frame, both full-screen triangles:
//
//   texture pass:  texture.frag  ──> procedural image (offscreen, 128x128)
//   toy pass:      toy.frag      ──> swapchain image
//                    ├── binding 0: procedural image
//                    ├── binding 1: texture loaded from disk
//                    └── binding 2: ShaderParams (one buffer per frame slot)
//
// FRAME FLOW:
// 1. Wait for the frame slot (fence), recycle its command buffer + descriptors
// 2. Acquire swapchain image (signals the slot's image-available semaphore)
// 3. Record barriers and draws
// 4. Submit, waiting on image-available, signaling the image's present-ready
// 5. Present, waiting on present-ready
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{IVec2, UVec2};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

use crate::backend::barriers::{ImageState, ResourceStates};
use crate::backend::buffer::Buffer;
use crate::backend::frames::{FrameContext, FrameRing};
use crate::backend::image::{Image, Sampler};
use crate::backend::oneshot::OneShotCommands;
use crate::backend::pipeline::{self, FullscreenPipeline, ProgramLayout};
use crate::backend::swapchain::{AcquireResult, Swapchain};
use crate::backend::timestamps::{GpuTimer, GpuTimings, Timestamp};
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::hot_reload::ShaderWatcher;
use crate::params::{ShaderParams, TextureParams};
use crate::texture::TextureData;

const PROCEDURAL_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// What `draw_frame` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing was rendered (minimized window or stale swapchain)
    Skipped,
}

pub struct ShadertoyRenderer {
    // GPU objects first: they are dropped before the device Arc below
    toy_pipeline: FullscreenPipeline,
    texture_pipeline: FullscreenPipeline,
    params_buffers: Vec<Buffer>,
    procedural_image: Image,
    file_texture: Image,
    sampler: Sampler,
    gpu_timer: Option<GpuTimer>,
    frames: FrameRing,
    swapchain: Swapchain,
    states: ResourceStates,

    shader_dir: PathBuf,
    watcher: Option<ShaderWatcher>,
    reload_requested: bool,
    needs_recreate: bool,
    simulated_cpu_work: Duration,
    last_gpu_timings: Option<GpuTimings>,

    device: Arc<VulkanDevice>,
}

impl ShadertoyRenderer {
    /// Set up everything the frame loop needs.
    ///
    /// Fails if the texture file cannot be loaded or the shaders are missing.
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, window)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            vk::Extent2D {
                width: size.width.max(1),
                height: size.height.max(1),
            },
            config.present_mode_preference(),
        )?;

        let frames = FrameRing::new(device.clone(), config.graphics.frames_in_flight)?;
        let gpu_timer = GpuTimer::new(device.clone(), frames.frames_in_flight())?;
        let mut states = ResourceStates::new();

        // Texture upload runs once, before the first frame
        let texture = TextureData::from_file(&config.assets.texture)?;
        let mut uploader = OneShotCommands::new(device.clone())?;
        let file_texture = Image::from_rgba8(
            device.clone(),
            &mut uploader,
            &mut states,
            "texture",
            vk::Extent2D {
                width: texture.width,
                height: texture.height,
            },
            &texture.pixels,
        )?;
        drop(uploader);

        let procedural_image = Image::new(
            device.clone(),
            "procedural",
            config.texture_extent(),
            PROCEDURAL_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;

        let sampler = Sampler::new(device.clone(), vk::SamplerAddressMode::REPEAT)?;

        let shader_dir = config.assets.shader_dir.clone();
        let (toy_pipeline, texture_pipeline) =
            build_pipelines(&device, &shader_dir, swapchain.format)?;

        // One uniform buffer per frame slot: a slot's buffer is only written
        // after the slot's fence says the GPU is done reading it.
        let params_buffers = (0..frames.frames_in_flight())
            .map(|slot| Buffer::uniform::<ShaderParams>(device.clone(), &format!("params {}", slot)))
            .collect::<Result<Vec<_>>>()?;

        let watcher = if config.debug.hot_reload {
            ShaderWatcher::new(&shader_dir)
                .map_err(|e| log::warn!("Shader hot reload disabled: {:#}", e))
                .ok()
        } else {
            None
        };

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            toy_pipeline,
            texture_pipeline,
            params_buffers,
            procedural_image,
            file_texture,
            sampler,
            gpu_timer,
            frames,
            swapchain,
            states,
            shader_dir,
            watcher,
            reload_requested: false,
            needs_recreate: false,
            simulated_cpu_work: Duration::from_millis(config.graphics.simulated_cpu_work_ms),
            last_gpu_timings: None,
            device,
        })
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// GPU durations of the most recent frame whose timestamps were read back
    pub fn gpu_timings(&self) -> Option<GpuTimings> {
        self.last_gpu_timings
    }

    /// Window size changed; the swapchain is rebuilt before the next frame
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Rebuild both pipelines from the .spv files before the next frame
    pub fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    /// Render and present one frame.
    ///
    /// `window_size` is the current framebuffer size; a zero dimension means
    /// the window is minimized and the frame is skipped.
    pub fn draw_frame(&mut self, window_size: UVec2, mouse_pos: IVec2) -> Result<FrameOutcome> {
        puffin::profile_function!();

        if window_size.x == 0 || window_size.y == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        if self.needs_recreate {
            self.recreate_swapchain(window_size)?;
        }

        if let Some(watcher) = &self.watcher {
            if !watcher.take_changes().is_empty() {
                self.reload_requested = true;
            }
        }
        if self.reload_requested {
            self.reload_pipelines();
        }

        let frame = {
            puffin::profile_scope!("Wait for frame slot");
            self.frames.begin_frame()?
        };
        if let Some(timer) = &mut self.gpu_timer {
            if let Some(timings) = timer.read(frame.slot) {
                log::trace!("GPU frame {}: {:?}", frame.frame_number, timings);
                self.last_gpu_timings = Some(timings);
            }
        }

        let image_index = {
            puffin::profile_scope!("Acquire");
            match self.swapchain.acquire_next_image(frame.image_available)? {
                AcquireResult::Acquired { index, suboptimal } => {
                    // Still usable this frame; the semaphore is already pending
                    if suboptimal {
                        self.needs_recreate = true;
                    }
                    index
                }
                AcquireResult::OutOfDate => {
                    self.needs_recreate = true;
                    self.frames.skip(&frame);
                    return Ok(FrameOutcome::Skipped);
                }
            }
        };

        if let Err(e) = self.record_and_submit(&frame, image_index, mouse_pos) {
            self.abandon_frame(&frame);
            return Err(e);
        }

        let presented = {
            puffin::profile_scope!("Present");
            self.swapchain.present(self.device.graphics_queue, image_index)?
        };
        if presented.needs_recreate() {
            log::debug!("Present returned {:?}, recreating swapchain", presented);
            self.needs_recreate = true;
        }

        Ok(FrameOutcome::Presented)
    }

    fn record_and_submit(&mut self, frame: &FrameContext, image_index: u32, mouse_pos: IVec2) -> Result<()> {
        {
            puffin::profile_scope!("Record");
            self.record_frame(frame, image_index, mouse_pos)?;
        }

        puffin::profile_scope!("Submit");
        let present_ready = self.swapchain.present_ready[image_index as usize];
        self.frames.submit(frame, present_ready)?;
        if let Some(timer) = &mut self.gpu_timer {
            timer.mark_submitted(frame.slot);
        }
        Ok(())
    }

    /// Recording or submission failed after the image was acquired. The
    /// tracked states describe commands that never ran, and the acquired
    /// image will not be presented.
    fn abandon_frame(&mut self, frame: &FrameContext) {
        if let Err(e) = self.frames.abandon(frame) {
            log::error!("Failed to recover frame slot {}: {:#}", frame.slot, e);
        }
        self.states.discard(self.procedural_image.image);
        for &image in &self.swapchain.images {
            self.states.discard(image);
        }
        self.needs_recreate = true;
    }

    fn record_frame(&mut self, frame: &FrameContext, image_index: u32, mouse_pos: IVec2) -> Result<()> {
        let device = &self.device.device;
        let cmd = frame.command_buffer;
        let backbuffer = self.swapchain.images[image_index as usize];
        let backbuffer_view = self.swapchain.image_views[image_index as usize];
        let extent = self.swapchain.extent;

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin frame command buffer")?;

        if let Some(timer) = &mut self.gpu_timer {
            timer.begin(cmd, frame.slot);
        }

        // ── Texture pass ────────────────────────────────────────────────────
        // The previous frame sampled this image; the tracker turns that into
        // a write-after-read barrier.
        self.states.set_state(
            self.procedural_image.image,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
        self.states.flush(device, cmd);

        let texture_extent = self.procedural_image.extent;
        let texture_params = TextureParams {
            resolution: UVec2::new(texture_extent.width, texture_extent.height),
        };
        pipeline::begin_rendering(device, cmd, self.procedural_image.view, texture_extent);
        unsafe {
            device.cmd_push_constants(
                cmd,
                self.texture_pipeline.layout.pipeline_layout,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&texture_params),
            );
        }
        self.texture_pipeline.draw(device, cmd, texture_extent);
        pipeline::end_rendering(device, cmd);
        self.write_timestamp(cmd, frame.slot, Timestamp::TextureEnd);

        // ── Barriers for the toy pass ───────────────────────────────────────
        for image in [self.procedural_image.image, self.file_texture.image] {
            self.states.set_state(
                image,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
            );
        }

        // Old contents of the acquired image are irrelevant
        self.states.assume_state(backbuffer, ImageState::ACQUIRED);
        self.states.set_state(
            backbuffer,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
        self.states.flush(device, cmd);

        if !self.simulated_cpu_work.is_zero() {
            puffin::profile_scope!("Sleep");
            std::thread::sleep(self.simulated_cpu_work);
        }

        // ── Toy pass ────────────────────────────────────────────────────────
        let params = ShaderParams::new(UVec2::new(extent.width, extent.height), mouse_pos);
        let params_buffer = &mut self.params_buffers[frame.slot];
        params_buffer.write_pod(&params)?;

        let descriptor_set = self.toy_pipeline.layout.write_descriptor_set(
            frame.descriptor_pool,
            &[
                self.procedural_image
                    .descriptor_info(&self.sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                self.file_texture
                    .descriptor_info(&self.sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ],
            &[params_buffer.descriptor_info()],
        )?;

        self.write_timestamp(cmd, frame.slot, Timestamp::ImageStart);
        pipeline::begin_rendering(device, cmd, backbuffer_view, extent);
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.toy_pipeline.layout.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
        }
        self.toy_pipeline.draw(device, cmd, extent);
        pipeline::end_rendering(device, cmd);
        self.write_timestamp(cmd, frame.slot, Timestamp::FrameEnd);

        // Present waits on a semaphore, not a stage: keep the stage at
        // COLOR_ATTACHMENT_OUTPUT with no access, matching ImageState::ACQUIRED.
        self.states.set_state(
            backbuffer,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageAspectFlags::COLOR,
        );
        self.states.flush(device, cmd);

        unsafe { device.end_command_buffer(cmd) }.context("Failed to end frame command buffer")?;

        Ok(())
    }

    fn write_timestamp(&self, cmd: vk::CommandBuffer, slot: usize, timestamp: Timestamp) {
        if let Some(timer) = &self.gpu_timer {
            timer.write(cmd, slot, timestamp);
        }
    }

    fn recreate_swapchain(&mut self, window_size: UVec2) -> Result<()> {
        // Old images may still be in use by in-flight frames
        self.device.wait_idle()?;

        for &image in &self.swapchain.images {
            self.states.discard(image);
        }

        let extent = self.swapchain.recreate(vk::Extent2D {
            width: window_size.x,
            height: window_size.y,
        })?;
        self.needs_recreate = false;

        if self.swapchain.format != self.toy_pipeline.color_format {
            log::info!("Swapchain format changed, rebuilding pipelines");
            self.reload_requested = true;
        }

        log::info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Rebuild pipelines; on failure keep rendering with the old ones
    fn reload_pipelines(&mut self) {
        self.reload_requested = false;

        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for GPU before reload: {:#}", e);
            return;
        }

        match build_pipelines(&self.device, &self.shader_dir, self.swapchain.format) {
            Ok((toy, texture)) => {
                self.toy_pipeline = toy;
                self.texture_pipeline = texture;
                log::info!("Shaders reloaded");
            }
            Err(e) => log::error!("Shader reload failed, keeping previous pipelines: {:#}", e),
        }
    }
}

impl Drop for ShadertoyRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Everything below is destroyed by field drops; none of it may be in use
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for GPU on shutdown: {:#}", e);
        }
    }
}

/// Build the toy pipeline (swapchain format) and the texture pipeline
/// (procedural image format) from `shader_dir`.
fn build_pipelines(
    device: &Arc<VulkanDevice>,
    shader_dir: &Path,
    swapchain_format: vk::Format,
) -> Result<(FullscreenPipeline, FullscreenPipeline)> {
    let vert = shader_dir.join("toy.vert.spv");

    let sampled = |binding| {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()
    };
    let toy_bindings = [
        sampled(0),
        sampled(1),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(2)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];
    let toy_layout = ProgramLayout::new(device.clone(), &toy_bindings, &[])?;
    let toy = FullscreenPipeline::new(
        device.clone(),
        toy_layout,
        &vert,
        &shader_dir.join("toy.frag.spv"),
        swapchain_format,
    )?;

    let push_constants = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: std::mem::size_of::<TextureParams>() as u32,
    }];
    let texture_layout = ProgramLayout::new(device.clone(), &[], &push_constants)?;
    let texture = FullscreenPipeline::new(
        device.clone(),
        texture_layout,
        &vert,
        &shader_dir.join("texture.frag.spv"),
        PROCEDURAL_FORMAT,
    )?;

    Ok((toy, texture))
}
