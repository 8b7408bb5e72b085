use anyhow::{Context, Result, anyhow};
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, Handle, KhrSurfaceExtension};
use vulkanalia::window as vk_window;

use crate::config::RendererConfig;
use crate::device::{
    PhysicalDeviceSource, QueueFamilyIndices, SurfaceQuery, SwapchainSupport, create_logical_device,
    pick_physical_device,
};
use crate::error::GraphicsError;
use crate::frame::{FrameCycle, InFlightFrameData, MAX_FRAMES_IN_FLIGHT, VulkanFrameBackend};
use crate::handle;
use crate::instance::{create_debug_messenger, create_instance};
use crate::shader::ShaderCompiler;
use crate::swapchain::{SurfaceStatus, SwapChain, SwapchainPlan};
use crate::window::RenderWindow;

/// Owns every device-level Vulkan object and drives the frame loop.
///
/// Built empty by [`new`](Self::new) and brought up by
/// [`initialize`](Self::initialize). Every handle starts null, so
/// [`destroy`](Self::destroy) can run at any point, including after a failed
/// initialization, and any number of times.
pub struct DeviceContext {
    config: RendererConfig,
    entry: Option<Entry>,
    instance: Option<Instance>,
    messenger: vk::DebugUtilsMessengerEXT,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    swapchain_support: SwapchainSupport,
    layers: Vec<vk::ExtensionName>,
    instance_extensions: Vec<vk::ExtensionProperties>,
    device_extensions: Vec<vk::ExtensionProperties>,
    device: Option<Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    frames: [InFlightFrameData; MAX_FRAMES_IN_FLIGHT],
    cycle: FrameCycle,
    swapchain: SwapChain,
    compiler: Option<ShaderCompiler>,
    framebuffer_size: (u32, u32),
    recreate_pending: bool,
}

impl DeviceContext {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            entry: None,
            instance: None,
            messenger: vk::DebugUtilsMessengerEXT::null(),
            surface: vk::SurfaceKHR::null(),
            physical_device: vk::PhysicalDevice::null(),
            queue_families: QueueFamilyIndices::default(),
            swapchain_support: SwapchainSupport::default(),
            layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            device: None,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            command_pool: vk::CommandPool::null(),
            frames: Default::default(),
            cycle: FrameCycle::new(),
            swapchain: SwapChain::default(),
            compiler: None,
            framebuffer_size: (0, 0),
            recreate_pending: false,
        }
    }

    /// Creates everything from the instance down to the per-frame sync
    /// objects, in dependency order.
    ///
    /// A context that was already initialized is torn down first. On failure
    /// whatever was created stays owned by `self` and is released by
    /// [`destroy`](Self::destroy).
    pub unsafe fn initialize<W: RenderWindow>(&mut self, window: &W) -> Result<()> {
        self.destroy();

        self.compiler = Some(ShaderCompiler::new(self.config.shader_optimization)?);
        self.framebuffer_size = window.framebuffer_size();

        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;
        let created = create_instance(&entry, window, &self.config)?;
        self.entry = Some(entry);
        self.layers = created.layers;
        self.instance_extensions = created.extensions;
        let instance: &Instance = self.instance.insert(created.instance);

        if self.config.enable_validation {
            self.messenger = create_debug_messenger(instance)?;
        }

        self.surface = vk_window::create_surface(instance, window, window)?;

        let query = SurfaceQuery {
            instance,
            surface: self.surface,
        };
        let gpu = pick_physical_device(&query, &self.config.required_features)?;
        self.device_extensions = query.extensions(gpu.device)?;
        for extension in &self.device_extensions {
            log::debug!("Device extension: {}", extension.extension_name);
        }
        self.physical_device = gpu.device;
        self.queue_families = gpu.indices;

        let logical = create_logical_device(
            instance,
            &gpu,
            &self.layers,
            &self.config.required_features,
        )?;
        self.graphics_queue = logical.graphics_queue;
        self.present_queue = logical.present_queue;
        let device: &Device = self.device.insert(logical.device);

        self.swapchain_support = gpu.swapchain_support;
        let plan = SwapchainPlan::new(
            &self.swapchain_support,
            &self.queue_families,
            self.framebuffer_size,
        )?;
        let compiler = self.compiler.as_ref().ok_or(GraphicsError::NotInitialized)?;
        self.swapchain.create(device, self.surface, &plan, compiler)?;

        let graphics = self
            .queue_families
            .graphics
            .ok_or(GraphicsError::NoSuitableDevice)?;
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics);
        self.command_pool = device
            .create_command_pool(&info, None)
            .context("failed to create command pool")?;

        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
        let command_buffers = device
            .allocate_command_buffers(&info)
            .context("failed to allocate command buffers")?;
        for (frame, command_buffer) in self.frames.iter_mut().zip(command_buffers) {
            frame.command_buffer = command_buffer;
            frame.create_sync_objects(device)?;
        }

        self.cycle = FrameCycle::new();
        self.recreate_pending = false;
        log::info!("Device context initialized.");
        Ok(())
    }

    /// Renders one frame, rebuilding the swapchain first if a resize or an
    /// out-of-date surface asked for it.
    ///
    /// Nothing is drawn while the framebuffer has a zero dimension.
    pub unsafe fn render(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Err(GraphicsError::NotInitialized.into());
        }

        if self.recreate_pending {
            let (width, height) = self.framebuffer_size;
            if width == 0 || height == 0 {
                return Ok(());
            }
            self.recreate_swapchain()?;
        }

        let device = self.device.as_ref().ok_or(GraphicsError::NotInitialized)?;
        let mut backend = VulkanFrameBackend {
            device,
            swapchain: &self.swapchain,
            frames: &self.frames,
            graphics_queue: self.graphics_queue,
            present_queue: self.present_queue,
        };

        if self.cycle.render(&mut backend)? == SurfaceStatus::NeedsRecreate {
            log::debug!("Swapchain is out of date.");
            self.recreate_pending = true;
        }
        Ok(())
    }

    /// Records a new framebuffer size. The swapchain is rebuilt at the start
    /// of the next [`render`](Self::render).
    pub fn request_recreate(&mut self, width: u32, height: u32) {
        self.framebuffer_size = (width, height);
        self.recreate_pending = true;
    }

    unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        let instance = self.instance.as_ref().ok_or(GraphicsError::NotInitialized)?;
        let device = self.device.as_ref().ok_or(GraphicsError::NotInitialized)?;
        let compiler = self.compiler.as_ref().ok_or(GraphicsError::NotInitialized)?;

        device.device_wait_idle()?;

        let query = SurfaceQuery {
            instance,
            surface: self.surface,
        };
        self.swapchain_support = query.swapchain_support(self.physical_device)?;
        let plan = SwapchainPlan::new(
            &self.swapchain_support,
            &self.queue_families,
            self.framebuffer_size,
        )?;

        log::info!(
            "Recreating swapchain for a {}x{} framebuffer.",
            self.framebuffer_size.0,
            self.framebuffer_size.1
        );
        self.swapchain.create(device, self.surface, &plan, compiler)?;
        self.recreate_pending = false;
        Ok(())
    }

    /// Releases every owned handle in reverse dependency order. Safe to call
    /// repeatedly and on a context that was never initialized.
    pub unsafe fn destroy(&mut self) {
        if let Some(device) = self.device.as_ref() {
            if let Err(e) = device.device_wait_idle() {
                log::warn!("Waiting for device idle during teardown failed: {}", e);
            }
            for frame in &mut self.frames {
                frame.destroy(device, self.command_pool);
            }
            if let Some(command_pool) = handle::take(&mut self.command_pool) {
                device.destroy_command_pool(command_pool, None);
            }
            self.swapchain.destroy(device);
        }
        if let Some(device) = self.device.take() {
            device.destroy_device(None);
            log::info!("Destroyed logical device.");
        }
        self.graphics_queue = vk::Queue::null();
        self.present_queue = vk::Queue::null();

        if let Some(instance) = self.instance.as_ref() {
            if let Some(surface) = handle::take(&mut self.surface) {
                instance.destroy_surface_khr(surface, None);
            }
            if let Some(messenger) = handle::take(&mut self.messenger) {
                instance.destroy_debug_utils_messenger_ext(messenger, None);
            }
        }
        if let Some(instance) = self.instance.take() {
            instance.destroy_instance(None);
            log::info!("Destroyed Vulkan instance.");
        }
        self.physical_device = vk::PhysicalDevice::null();
        self.entry = None;
    }

    /// True when no Vulkan object is held.
    pub fn is_released(&self) -> bool {
        self.device.is_none()
            && self.instance.is_none()
            && self.messenger.is_null()
            && self.surface.is_null()
            && self.command_pool.is_null()
            && handle::is_null_all(&[self.graphics_queue, self.present_queue])
            && self.frames.iter().all(InFlightFrameData::is_released)
            && self.swapchain.is_released()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Every extension the instance layer reported, enabled or not.
    pub fn instance_extensions(&self) -> &[vk::ExtensionProperties] {
        &self.instance_extensions
    }

    /// Every extension the selected physical device reported.
    pub fn device_extensions(&self) -> &[vk::ExtensionProperties] {
        &self.device_extensions
    }

    pub fn layers(&self) -> &[vk::ExtensionName] {
        &self.layers
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn swapchain(&self) -> &SwapChain {
        &self.swapchain
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    pub fn current_frame(&self) -> usize {
        self.cycle.current()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe { self.destroy() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_context_destroys_twice() {
        let mut context = DeviceContext::new(RendererConfig::default());
        assert!(context.is_released());

        unsafe {
            context.destroy();
            context.destroy();
        }
        assert!(context.is_released());
        assert!(context.instance_extensions().is_empty());
        assert!(context.device_extensions().is_empty());
    }

    #[test]
    fn render_requires_initialization() {
        let mut context = DeviceContext::new(RendererConfig::default());
        let error = unsafe { context.render() }.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::NotInitialized)
        ));
    }

    #[test]
    fn resize_is_deferred_to_next_frame() {
        let mut context = DeviceContext::new(RendererConfig::default());
        assert!(!context.recreate_pending());

        context.request_recreate(800, 600);
        assert!(context.recreate_pending());
        assert_eq!(context.framebuffer_size(), (800, 600));

        context.request_recreate(0, 0);
        assert!(context.recreate_pending());
        assert_eq!(context.framebuffer_size(), (0, 0));
        assert_eq!(context.current_frame(), 0);
    }
}
