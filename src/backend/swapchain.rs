// Swapchain - Window presentation
//
// Owns the platform surface and everything built on top of it: swapchain,
// image views, render pass and framebuffers. The chain is never patched in
// place; invalidation tears all of it down and builds it again.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::gpu::{Gpu, SurfaceSupport};
use super::pipeline::{create_framebuffers, create_render_pass};
use crate::error::{RendererError, Result};

/// Prefer an sRGB 8-bit format with non-linear color space, else the first reported
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode when the surface offers it; FIFO is always available
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

/// The surface's own extent when it reports one, else the requested size clamped
/// to the supported range. A zero result means the window is minimised.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    if requested.width == 0 || requested.height == 0 {
        return vk::Extent2D::default();
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Everything derived from one swapchain build
#[derive(Debug, Default)]
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
}

impl SwapchainState {
    /// Returns `None` when the surface currently has a zero-sized extent
    fn build<G: Gpu + ?Sized>(
        gpu: &G,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Option<Self>> {
        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = gpu.surface_support(surface)?;

        let extent = choose_extent(&capabilities, requested);
        if extent.width == 0 || extent.height == 0 {
            log::info!("Surface has zero extent, presentation suspended");
            return Ok(None);
        }

        let surface_format = choose_surface_format(&formats).ok_or(RendererError::Unsupported(
            "a surface without any color format",
        ))?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let image_count = choose_image_count(&capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let mut state = SwapchainState {
            swapchain: gpu.create_swapchain(&create_info)?,
            extent,
            format: surface_format.format,
            present_mode,
            ..Default::default()
        };

        if let Err(e) = state.build_attachments(gpu) {
            state.destroy(gpu);
            return Err(e);
        }

        log::info!("Created swapchain with {} images", state.images.len());
        Ok(Some(state))
    }

    fn build_attachments<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        self.images = gpu.swapchain_images(self.swapchain)?;

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            self.image_views.push(gpu.create_image_view(&create_info)?);
        }

        self.render_pass = create_render_pass(gpu, self.format)?;
        self.framebuffers =
            create_framebuffers(gpu, &self.image_views, self.render_pass, self.extent)?;
        Ok(())
    }

    /// Dependency order: framebuffers, render pass, image views, swapchain
    fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for framebuffer in self.framebuffers.drain(..) {
            gpu.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        for view in self.image_views.drain(..) {
            gpu.destroy_image_view(view);
        }
        // Images belong to the swapchain
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

/// A platform surface plus its current swapchain
///
/// `state` is `None` while the surface is suspended (zero-sized window).
pub struct PresentationSurface<G: Gpu> {
    gpu: Arc<G>,
    surface: vk::SurfaceKHR,
    requested_extent: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
    state: Option<SwapchainState>,
    stale: bool,
}

impl<G: Gpu> PresentationSurface<G> {
    pub fn attach(
        gpu: Arc<G>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface = gpu.create_surface(display, window)?;

        let mut presentation = Self {
            gpu,
            surface,
            requested_extent: vk::Extent2D { width, height },
            preferred_present_mode,
            state: None,
            stale: false,
        };

        let graphics_family = presentation.gpu.queues().graphics_family;
        if !presentation.gpu.supports_present(graphics_family, surface)? {
            // Drop tears the surface down
            return Err(RendererError::Unsupported(
                "presentation from the graphics queue family",
            ));
        }

        presentation.build()?;
        Ok(presentation)
    }

    fn build(&mut self) -> Result<()> {
        self.state = SwapchainState::build(
            self.gpu.as_ref(),
            self.surface,
            self.requested_extent,
            self.preferred_present_mode,
        )?;
        self.stale = false;
        Ok(())
    }

    fn destroy_chain(&mut self) {
        if let Some(mut state) = self.state.take() {
            state.destroy(self.gpu.as_ref());
        }
    }

    /// Current chain, `None` while suspended
    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.is_none()
    }

    /// Flag the chain for rebuild before the next frame
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Suspended chains are retried too, in case the window came back
    pub fn needs_rebuild(&self) -> bool {
        self.stale || self.state.is_none()
    }

    /// Wait for the device, destroy the whole chain, then build it again
    pub fn invalidate(&mut self) -> Result<()> {
        self.gpu.wait_idle()?;
        self.destroy_chain();
        if let Err(e) = self.build() {
            self.stale = true;
            log::error!("Swapchain rebuild failed: {}", e);
            return Err(e);
        }
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        log::debug!("Surface resize requested: {}x{}", width, height);
        self.requested_extent = vk::Extent2D { width, height };
        self.invalidate()
    }

    /// Destroy the chain and the platform surface. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.surface == vk::SurfaceKHR::null() {
            return;
        }
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device idle wait failed during surface teardown: {}", e);
        }
        self.destroy_chain();
        self.gpu.destroy_surface(self.surface);
        self.surface = vk::SurfaceKHR::null();
        log::info!("Presentation surface destroyed");
    }
}

impl<G: Gpu> Drop for PresentationSurface<G> {
    fn drop(&mut self) {
        self.teardown();
    }
}
