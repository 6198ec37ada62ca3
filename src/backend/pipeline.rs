// Graphics pipeline creation and management
//
// Every pass in this renderer draws one full-screen triangle generated in
// the vertex shader, so pipelines have no vertex input. They target dynamic
// rendering (no render pass objects) and keep viewport/scissor dynamic so a
// swapchain resize does not require a rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::VulkanDevice;

const ENTRY_POINT: &CStr = c"main";

/// Descriptor set layout + pipeline layout of one shader program
pub struct ProgramLayout {
    pub set_layout: Option<vk::DescriptorSetLayout>,
    pub pipeline_layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl ProgramLayout {
    /// `bindings` describe set 0; an empty slice means no descriptor set
    pub fn new(
        device: Arc<VulkanDevice>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        push_constants: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let set_layout = if bindings.is_empty() {
            None
        } else {
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
            let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
                .context("Failed to create descriptor set layout")?;
            Some(layout)
        };

        let set_layouts: Vec<_> = set_layout.into_iter().collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_constants);

        let pipeline_layout = match unsafe { device.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                if let Some(set_layout) = set_layout {
                    unsafe { device.device.destroy_descriptor_set_layout(set_layout, None) };
                }
                return Err(e).context("Failed to create pipeline layout");
            }
        };

        Ok(Self {
            set_layout,
            pipeline_layout,
            device,
        })
    }

    /// Allocate one set from `pool` and point it at the given resources.
    ///
    /// `images` are written to bindings 0.., `buffers` follow them.
    pub fn write_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        images: &[vk::DescriptorImageInfo],
        buffers: &[vk::DescriptorBufferInfo],
    ) -> Result<vk::DescriptorSet> {
        let set_layout = self
            .set_layout
            .context("Program has no descriptor set layout")?;
        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        let set = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?[0];

        let mut writes = Vec::with_capacity(images.len() + buffers.len());
        for (binding, info) in images.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        for (offset, info) in buffers.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding((images.len() + offset) as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
            );
        }

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
        Ok(set)
    }
}

impl Drop for ProgramLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            if let Some(set_layout) = self.set_layout {
                self.device.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

/// Graphics pipeline drawing a full-screen triangle into one color attachment
pub struct FullscreenPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: ProgramLayout,
    pub color_format: vk::Format,
}

impl FullscreenPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: ProgramLayout,
        vert_path: &Path,
        frag_path: &Path,
        color_format: vk::Format,
    ) -> Result<Self> {
        let pipeline = create_fullscreen_pipeline(
            &device,
            layout.pipeline_layout,
            vert_path,
            frag_path,
            color_format,
        )?;

        log::info!("Built pipeline {:?} + {:?}", vert_path, frag_path);

        Ok(Self {
            pipeline,
            layout,
            color_format,
        })
    }

    /// Bind the pipeline and draw the triangle (3 vertices, no buffers)
    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_draw(cmd, 3, 1, 0, 0);
        }
    }
}

impl Drop for FullscreenPipeline {
    fn drop(&mut self) {
        unsafe { self.layout.device.device.destroy_pipeline(self.pipeline, None) };
    }
}

fn create_fullscreen_pipeline(
    device: &VulkanDevice,
    pipeline_layout: vk::PipelineLayout,
    vert_path: &Path,
    frag_path: &Path,
    color_format: vk::Format,
) -> Result<vk::Pipeline> {
    // Modules are only needed until the pipeline is created
    let vert = ShaderModule::load(device, vert_path)?;
    let frag = ShaderModule::load(device, frag_path)?;

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert.module)
            .name(ENTRY_POINT)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag.module)
            .name(ENTRY_POINT)
            .build(),
    ];

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only, the values are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();
    let color_blend_attachments = [color_blend_attachment];
    let color_blending =
        vk::PipelineColorBlendStateCreateInfo::builder().attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering_info =
        vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
    }
    .map_err(|(_, e)| e)
    .context("Failed to create graphics pipeline")?;

    Ok(pipelines[0])
}

/// Begin dynamic rendering into a single color attachment whose previous
/// contents are not needed.
pub fn begin_rendering(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    view: vk::ImageView,
    extent: vk::Extent2D,
) {
    let color_attachment = vk::RenderingAttachmentInfo::builder()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .build();
    let color_attachments = [color_attachment];

    let rendering_info = vk::RenderingInfo::builder()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments);

    unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };
}

pub fn end_rendering(device: &ash::Device, cmd: vk::CommandBuffer) {
    unsafe { device.cmd_end_rendering(cmd) };
}
