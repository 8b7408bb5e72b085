use anyhow::{Context, Result, anyhow};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{Handle, KhrSwapchainExtension};

use crate::handle;
use crate::swapchain::{SurfaceStatus, SwapChain};

/// How many frames the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Where a frame slot is in its trip through the render loop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

/// Command buffer and synchronization primitives of one frame slot.
///
/// Holds no reference to its owner; the device and pool are passed to
/// [`destroy`](Self::destroy) instead.
#[derive(Debug, Default)]
pub struct InFlightFrameData {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns immediately.
    pub in_flight: vk::Fence,
}

impl InFlightFrameData {
    pub unsafe fn create_sync_objects(&mut self, device: &Device) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        self.image_available = device
            .create_semaphore(&semaphore_info, None)
            .context("failed to create synchronization objects for a frame")?;
        self.render_finished = device
            .create_semaphore(&semaphore_info, None)
            .context("failed to create synchronization objects for a frame")?;
        self.in_flight = device
            .create_fence(&fence_info, None)
            .context("failed to create synchronization objects for a frame")?;

        Ok(())
    }

    /// Idempotent; every released field is nulled.
    pub unsafe fn destroy(&mut self, device: &Device, command_pool: vk::CommandPool) {
        if let Some(fence) = handle::take(&mut self.in_flight) {
            device.destroy_fence(fence, None);
        }
        if let Some(semaphore) = handle::take(&mut self.render_finished) {
            device.destroy_semaphore(semaphore, None);
        }
        if let Some(semaphore) = handle::take(&mut self.image_available) {
            device.destroy_semaphore(semaphore, None);
        }
        if let Some(command_buffer) = handle::take(&mut self.command_buffer) {
            if !command_pool.is_null() {
                device.free_command_buffers(command_pool, &[command_buffer]);
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.command_buffer.is_null()
            && self.image_available.is_null()
            && self.render_finished.is_null()
            && self.in_flight.is_null()
    }
}

/// The GPU-facing half of a frame: each method is one step of the loop.
pub trait FrameBackend {
    /// Blocks until the slot's previous submission has completed.
    fn wait_for_fence(&mut self, slot: usize) -> Result<()>;
    fn reset_fence(&mut self, slot: usize) -> Result<()>;
    /// `None` when the swapchain is out of date and nothing was acquired.
    fn acquire_image(&mut self, slot: usize) -> Result<Option<u32>>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus>;
}

/// Rotates through the frame slots and runs each frame's steps in order.
#[derive(Debug, Default)]
pub struct FrameCycle {
    current: usize,
    states: [FrameState; MAX_FRAMES_IN_FLIGHT],
}

impl FrameCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> FrameState {
        self.states[slot]
    }

    /// Renders one frame on the current slot.
    ///
    /// The slot's fence is only reset once an image has been acquired: an
    /// out-of-date acquire returns early and the fence must still be signaled
    /// for the next wait on this slot.
    pub fn render<B: FrameBackend>(&mut self, backend: &mut B) -> Result<SurfaceStatus> {
        let slot = self.current;
        self.states[slot] = FrameState::Idle;

        backend.wait_for_fence(slot)?;

        self.states[slot] = FrameState::Acquiring;
        let Some(image_index) = backend.acquire_image(slot)? else {
            self.states[slot] = FrameState::Idle;
            return Ok(SurfaceStatus::NeedsRecreate);
        };
        backend.reset_fence(slot)?;

        self.states[slot] = FrameState::Recording;
        backend.record(slot, image_index)?;

        backend.submit(slot)?;
        self.states[slot] = FrameState::Submitted;

        let status = backend.present(slot, image_index)?;
        self.states[slot] = FrameState::Presented;

        self.current = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(status)
    }
}

/// [`FrameBackend`] over live Vulkan objects.
pub struct VulkanFrameBackend<'a> {
    pub device: &'a Device,
    pub swapchain: &'a SwapChain,
    pub frames: &'a [InFlightFrameData; MAX_FRAMES_IN_FLIGHT],
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.frames[slot].in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.frames[slot].in_flight])? };
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Option<u32>> {
        let result = unsafe {
            self.device.acquire_next_image_khr(
                self.swapchain.swapchain,
                u64::MAX,
                self.frames[slot].image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, _)) => Ok(Some(image_index)),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(anyhow!(e).context("failed to acquire swap chain image")),
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let command_buffer = self.frames[slot].command_buffer;
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            record_command_buffer(self.device, self.swapchain, command_buffer, image_index)
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = &self.frames[slot];

        let wait_semaphores = &[frame.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[frame.command_buffer];
        let signal_semaphores = &[frame.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], frame.in_flight)
                .context("failed to submit draw command buffer")?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus> {
        let wait_semaphores = &[self.frames[slot].render_finished];
        let swapchains = &[self.swapchain.swapchain];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = unsafe {
            self.device
                .queue_present_khr(self.present_queue, &present_info)
        };

        match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => Ok(SurfaceStatus::NeedsRecreate),
            Ok(_) => Ok(SurfaceStatus::Ok),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(SurfaceStatus::NeedsRecreate),
            Err(e) => Err(anyhow!(e).context("failed to present swap chain image")),
        }
    }
}

unsafe fn record_command_buffer(
    device: &Device,
    swapchain: &SwapChain,
    command_buffer: vk::CommandBuffer,
    image_index: u32,
) -> Result<()> {
    let info = vk::CommandBufferBeginInfo::builder();
    device
        .begin_command_buffer(command_buffer, &info)
        .context("failed to begin recording command buffer")?;

    let render_area = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(swapchain.extent);

    let color_clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    };

    let clear_values = &[color_clear_value];
    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(swapchain.render_pass)
        .framebuffer(swapchain.framebuffers[image_index as usize])
        .render_area(render_area)
        .clear_values(clear_values);

    device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        swapchain.pipeline,
    );
    device.cmd_draw(command_buffer, 3, 1, 0, 0);
    device.cmd_end_render_pass(command_buffer);

    device
        .end_command_buffer(command_buffer)
        .context("failed to record command buffer")?;

    Ok(())
}
