use anyhow::{Context, Result};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::Handle;

use crate::shader::{ShaderCompiler, ShaderModule, TRIANGLE_FRAGMENT, TRIANGLE_VERTEX};
use crate::swapchain::SwapChain;

/// Views are pushed one at a time so a failure part way through still leaves
/// every created view reachable from `swapchain` for teardown.
pub unsafe fn create_image_views(device: &Device, swapchain: &mut SwapChain) -> Result<()> {
    swapchain.image_views.reserve(swapchain.images.len());

    for image in &swapchain.images {
        let components = vk::ComponentMapping::builder()
            .r(vk::ComponentSwizzle::IDENTITY)
            .g(vk::ComponentSwizzle::IDENTITY)
            .b(vk::ComponentSwizzle::IDENTITY)
            .a(vk::ComponentSwizzle::IDENTITY);

        let info = vk::ImageViewCreateInfo::builder()
            .image(*image)
            .view_type(vk::ImageViewType::_2D)
            .format(swapchain.surface_format.format)
            .components(components)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );

        let view = device
            .create_image_view(&info, None)
            .context("failed to create an image view")?;
        swapchain.image_views.push(view);
    }

    Ok(())
}

pub unsafe fn create_render_pass(device: &Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments);

    // The layout transition waits for the acquire semaphore at this stage.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    device
        .create_render_pass(&info, None)
        .context("failed to create render pass")
}

/// Compiles the embedded triangle shaders and builds the fixed-function
/// pipeline for the current extent. Vertices come from `gl_VertexIndex`, so
/// there is no vertex input.
pub unsafe fn create_pipeline(
    device: &Device,
    swapchain: &mut SwapChain,
    compiler: &ShaderCompiler,
) -> Result<()> {
    let vert = ShaderModule::new(device, &compiler.compile_source(&TRIANGLE_VERTEX)?)?;
    let frag = ShaderModule::new(device, &compiler.compile_source(&TRIANGLE_FRAGMENT)?)?;
    let stages = &[vert.stage_info()?, frag.stage_info()?];

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let extent = swapchain.extent;
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent);

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1)
        .min_sample_shading(1.0)
        .alpha_to_coverage_enable(false)
        .alpha_to_one_enable(false);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(false);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(attachments)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    swapchain.pipeline_layout = device
        .create_pipeline_layout(&layout_info, None)
        .context("failed to create pipeline layout")?;

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .color_blend_state(&color_blend_state)
        .layout(swapchain.pipeline_layout)
        .render_pass(swapchain.render_pass)
        .subpass(0);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        .context("failed to create graphics pipeline")?;
    swapchain.pipeline = pipelines.0[0];

    Ok(())
}

pub unsafe fn create_framebuffers(device: &Device, swapchain: &mut SwapChain) -> Result<()> {
    swapchain.framebuffers.reserve(swapchain.image_views.len());

    for view in &swapchain.image_views {
        let attachments = &[*view];
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(swapchain.render_pass)
            .attachments(attachments)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);

        let framebuffer = device
            .create_framebuffer(&info, None)
            .context("failed to create a framebuffer")?;
        swapchain.framebuffers.push(framebuffer);
    }

    Ok(())
}
