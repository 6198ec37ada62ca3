// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus one "present ready" semaphore per image. Those are indexed by image,
// not by frame slot: the presentation engine may still hold a semaphore from
// an older frame when the same slot comes around again.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::sync::create_semaphore;
use super::VulkanDevice;

/// Outcome of vkAcquireNextImageKHR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated
    OutOfDate,
}

/// Outcome of vkQueuePresentKHR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentResult {
    pub fn needs_recreate(self) -> bool {
        self != PresentResult::Presented
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// Signaled when rendering into the image with the same index finished
    pub present_ready: Vec<vk::Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    present_preference: Vec<vk::PresentModeKHR>,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        extent: vk::Extent2D,
        present_preference: &[vk::PresentModeKHR],
    ) -> Result<Self> {
        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            present_ready: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
            present_preference: present_preference.to_vec(),
            device,
        };
        swapchain.recreate(extent)?;
        Ok(swapchain)
    }

    /// Rebuild the swapchain for a new window size.
    ///
    /// The caller must make sure the GPU no longer uses the old images.
    pub fn recreate(&mut self, desired: vk::Extent2D) -> Result<vk::Extent2D> {
        let device = self.device.clone();

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .context("Failed to query surface formats")?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .context("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&self.present_preference, &present_modes);
        let extent = choose_extent(&surface_caps, desired);
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // The old chain is retired by create_swapchain, now free its objects
        self.destroy_views_and_semaphores();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
            self.present_ready.push(create_semaphore(&device)?);
        }

        self.format = surface_format.format;
        self.extent = extent;

        Ok(extent)
    }

    /// Acquire next image for rendering; `semaphore` is signaled once the
    /// presentation engine releases it.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireResult> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen once its present-ready semaphore fires
    pub fn present(&self, queue: vk::Queue, image_index: u32) -> Result<PresentResult> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [self.present_ready[image_index as usize]];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    fn destroy_views_and_semaphores(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            for semaphore in self.present_ready.drain(..) {
                self.device.device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views_and_semaphores();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer 8-bit sRGB BGRA, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// First preferred mode the surface supports; FIFO is always available
pub fn choose_present_mode(
    preference: &[vk::PresentModeKHR],
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    preference
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent unless it reports the 0xFFFFFFFF wildcard
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desired
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum so acquire rarely blocks; 0 max means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_extent_wins() {
        let caps = caps((800, 600), 2, 3);
        let extent = choose_extent(&caps, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_wildcard_extent_clamped() {
        let caps = caps((u32::MAX, u32::MAX), 2, 3);
        let extent = choose_extent(&caps, vk::Extent2D { width: 10_000, height: 720 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 720 });
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let preference = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&preference, &available), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(
            choose_present_mode(&preference, &[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).map(|f| f.format), Some(srgb.format));
        assert_eq!(choose_surface_format(&[unorm]).map(|f| f.format), Some(unorm.format));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_only_presented_skips_recreate() {
        assert!(!PresentResult::Presented.needs_recreate());
        assert!(PresentResult::Suboptimal.needs_recreate());
        assert!(PresentResult::OutOfDate.needs_recreate());
    }
}
