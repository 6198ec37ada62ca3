// Images and samplers
//
// 2D color images backed by gpu-allocator memory, each with one view over
// the whole image. Layout transitions go through `ResourceStates`.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::barriers::ResourceStates;
use super::buffer::{free_allocation, Buffer};
use super::oneshot::OneShotCommands;
use super::{release_on_error, VulkanDevice};

pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", name))?;

        let (allocation, view) = release_on_error(
            image,
            |image| {
                let requirements = unsafe { device.device.get_image_memory_requirements(image) };

                let allocation = device
                    .allocator()
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .with_context(|| format!("Failed to allocate memory for image '{}'", name))?;

                match bind_and_create_view(&device, image, &allocation, format, name) {
                    Ok(view) => Ok((allocation, view)),
                    Err(e) => {
                        free_allocation(&device, allocation);
                        Err(e)
                    }
                }
            },
            |image| unsafe { device.device.destroy_image(image, None) },
        )?;

        log::debug!("Created image '{}' {}x{} {:?}", name, extent.width, extent.height, format);

        Ok(Self {
            image,
            view,
            extent,
            allocation: Some(allocation),
            device,
        })
    }

    /// Create a sampled image from tightly packed RGBA8 pixels.
    ///
    /// The copy runs on `uploader` and has finished when this returns; the
    /// image is left in SHADER_READ_ONLY_OPTIMAL as recorded in `states`.
    pub fn from_rgba8(
        device: Arc<VulkanDevice>,
        uploader: &mut OneShotCommands,
        states: &mut ResourceStates,
        name: &str,
        extent: vk::Extent2D,
        pixels: &[u8],
    ) -> Result<Self> {
        let expected = extent.width as usize * extent.height as usize * 4;
        anyhow::ensure!(
            pixels.len() == expected,
            "Image '{}' has {} bytes, expected {} for {}x{} RGBA8",
            name,
            pixels.len(),
            expected,
            extent.width,
            extent.height
        );

        let image = Self::new(
            device.clone(),
            name,
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;
        let staging = Buffer::staging(device, &format!("{} staging", name), pixels)?;

        uploader.run(|device, cmd| {
            states.set_state(
                image.image,
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
            );
            states.flush(device, cmd);

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();

            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            states.set_state(
                image.image,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageAspectFlags::COLOR,
            );
            states.flush(device, cmd);
            Ok(())
        })?;

        log::info!("Uploaded image '{}' ({}x{})", name, extent.width, extent.height);

        Ok(image)
    }

    pub fn descriptor_info(&self, sampler: &Sampler, layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: sampler.sampler,
            image_view: self.view,
            image_layout: layout,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            free_allocation(&self.device, allocation);
        }
    }
}

pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    /// Linear filtering with the same address mode on every axis
    pub fn new(device: Arc<VulkanDevice>, address_mode: vk::SamplerAddressMode) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self { sampler, device })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

fn bind_and_create_view(
    device: &VulkanDevice,
    image: vk::Image,
    allocation: &Allocation,
    format: vk::Format,
    name: &str,
) -> Result<vk::ImageView> {
    unsafe {
        device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .with_context(|| format!("Failed to bind memory for image '{}'", name))?;
    }

    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(color_subresource_range());

    unsafe { device.device.create_image_view(&view_info, None) }
        .with_context(|| format!("Failed to create view for image '{}'", name))
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
