use anyhow::{Context, Result};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{Handle, KhrSwapchainExtension};

use crate::device::{QueueFamilyIndices, SwapchainSupport};
use crate::error::GraphicsError;
use crate::handle;
use crate::pipeline;
use crate::shader::ShaderCompiler;

/// Present mode used whenever mailbox is unavailable. Always supported.
pub const FALLBACK_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

/// Outcome of an acquire or present that did not fail outright.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Ok,
    /// The swapchain no longer matches the surface and must be rebuilt.
    NeedsRecreate,
}

fn is_preferred_format(format: &vk::SurfaceFormatKHR) -> bool {
    format.format == vk::Format::B8G8R8A8_SRGB
        && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
}

/// BGRA8 sRGB when offered, otherwise the first supported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(is_preferred_format)
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(FALLBACK_PRESENT_MODE)
}

/// Clamps the framebuffer size into the surface's extent bounds.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    (width, height): (u32, u32),
) -> vk::Extent2D {
    let clamp = |min: u32, max: u32, v: u32| min.max(max.min(v));
    vk::Extent2D {
        width: clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
            width,
        ),
        height: clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
            height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when it is nonzero.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Every decision that goes into a swapchain create call, made up front.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        support: &SwapchainSupport,
        indices: &QueueFamilyIndices,
        framebuffer_size: (u32, u32),
    ) -> Result<Self> {
        let surface_format =
            choose_surface_format(&support.formats).ok_or(GraphicsError::InadequateSwapchain)?;
        if support.present_modes.is_empty() {
            return Err(GraphicsError::InadequateSwapchain.into());
        }
        let (graphics, present) = indices.resolved().ok_or(GraphicsError::NoSuitableDevice)?;

        let (sharing_mode, queue_family_indices) = if graphics == present {
            (vk::SharingMode::EXCLUSIVE, vec![])
        } else {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        };

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            sharing_mode,
            queue_family_indices,
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// The presentable image chain and everything sized to it: image views,
/// render pass, graphics pipeline and framebuffers.
#[derive(Debug, Default)]
pub struct SwapChain {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub swapchain: vk::SwapchainKHR,
    /// Owned by `swapchain`; never freed individually.
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapChain {
    /// Builds the whole set from `plan`, tearing down any previous one first.
    ///
    /// On failure the partially built set is left in place for [`destroy`](Self::destroy).
    pub unsafe fn create(
        &mut self,
        device: &Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
        compiler: &ShaderCompiler,
    ) -> Result<()> {
        self.destroy(device);

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode)
            .queue_family_indices(&plan.queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = device
            .create_swapchain_khr(&info, None)
            .context("failed to create swap chain")?;
        self.images = device.get_swapchain_images_khr(self.swapchain)?;
        self.surface_format = plan.surface_format;
        self.present_mode = plan.present_mode;
        self.extent = plan.extent;

        log::info!(
            "Created swapchain: {:?} / {:?}, {:?}, {}x{}, {} images.",
            self.surface_format.format,
            self.surface_format.color_space,
            self.present_mode,
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        pipeline::create_image_views(device, self)?;
        self.render_pass = pipeline::create_render_pass(device, self.surface_format.format)?;
        pipeline::create_pipeline(device, self, compiler)?;
        pipeline::create_framebuffers(device, self)?;

        Ok(())
    }

    /// Releases everything in reverse creation order. Safe to call repeatedly.
    pub unsafe fn destroy(&mut self, device: &Device) {
        for framebuffer in handle::drain(&mut self.framebuffers) {
            device.destroy_framebuffer(framebuffer, None);
        }
        if let Some(pipeline) = handle::take(&mut self.pipeline) {
            device.destroy_pipeline(pipeline, None);
        }
        if let Some(layout) = handle::take(&mut self.pipeline_layout) {
            device.destroy_pipeline_layout(layout, None);
        }
        if let Some(render_pass) = handle::take(&mut self.render_pass) {
            device.destroy_render_pass(render_pass, None);
        }
        for view in handle::drain(&mut self.image_views) {
            device.destroy_image_view(view, None);
        }
        self.images.clear();
        if let Some(swapchain) = handle::take(&mut self.swapchain) {
            device.destroy_swapchain_khr(swapchain, None);
        }
    }

    /// True when no handle is held.
    pub fn is_released(&self) -> bool {
        self.swapchain.is_null()
            && self.images.is_empty()
            && self.image_views.is_empty()
            && self.render_pass.is_null()
            && self.pipeline_layout.is_null()
            && self.pipeline.is_null()
            && self.framebuffers.is_empty()
    }
}
