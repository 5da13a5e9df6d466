// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic, so pipelines outlive swapchain rebuilds.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use super::gpu::Gpu;
use crate::error::{RendererError, Result};

/// Floats per interleaved vertex: position, normal, uv
pub const VERTEX_FLOATS: usize = 8;
pub const VERTEX_STRIDE: u32 = (VERTEX_FLOATS * std::mem::size_of::<f32>()) as u32;

/// Per-draw data pushed before every draw call
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub mvp: Mat4,
    pub color: Vec4,
}

pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}

/// Fixed-function state decoded from the host's integer option list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub polygon_mode: vk::PolygonMode,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            polygon_mode: vk::PolygonMode::FILL,
            blend: BlendMode::Opaque,
            depth_test: false,
            depth_write: false,
        }
    }
}

impl PipelineConfig {
    const FIELDS: [&'static str; 7] = [
        "topology",
        "cull mode",
        "front face",
        "polygon mode",
        "blend mode",
        "depth test",
        "depth write",
    ];

    /// Positional layout:
    /// `[topology, cull_mode, front_face, polygon_mode, blend_mode, depth_test, depth_write]`.
    /// Missing trailing entries keep their defaults.
    pub fn decode(config: &[i32]) -> Result<Self> {
        if config.len() > Self::FIELDS.len() {
            return Err(RendererError::InvalidArgument(format!(
                "pipeline config has {} entries, at most {} are understood",
                config.len(),
                Self::FIELDS.len()
            )));
        }

        let mut decoded = Self::default();
        for (field, &value) in config.iter().enumerate() {
            let out_of_range = || {
                RendererError::InvalidArgument(format!(
                    "{} value {} is out of range",
                    Self::FIELDS[field],
                    value
                ))
            };
            match field {
                0 => {
                    decoded.topology = match value {
                        0 => vk::PrimitiveTopology::TRIANGLE_LIST,
                        1 => vk::PrimitiveTopology::TRIANGLE_STRIP,
                        2 => vk::PrimitiveTopology::LINE_LIST,
                        3 => vk::PrimitiveTopology::LINE_STRIP,
                        4 => vk::PrimitiveTopology::POINT_LIST,
                        _ => return Err(out_of_range()),
                    }
                }
                1 => {
                    decoded.cull_mode = match value {
                        0 => vk::CullModeFlags::NONE,
                        1 => vk::CullModeFlags::FRONT,
                        2 => vk::CullModeFlags::BACK,
                        _ => return Err(out_of_range()),
                    }
                }
                2 => {
                    decoded.front_face = match value {
                        0 => vk::FrontFace::COUNTER_CLOCKWISE,
                        1 => vk::FrontFace::CLOCKWISE,
                        _ => return Err(out_of_range()),
                    }
                }
                3 => {
                    decoded.polygon_mode = match value {
                        0 => vk::PolygonMode::FILL,
                        1 => vk::PolygonMode::LINE,
                        2 => vk::PolygonMode::POINT,
                        _ => return Err(out_of_range()),
                    }
                }
                4 => {
                    decoded.blend = match value {
                        0 => BlendMode::Opaque,
                        1 => BlendMode::Alpha,
                        2 => BlendMode::Additive,
                        _ => return Err(out_of_range()),
                    }
                }
                5 | 6 => {
                    let flag = match value {
                        0 => false,
                        1 => true,
                        _ => return Err(out_of_range()),
                    };
                    if field == 5 {
                        decoded.depth_test = flag;
                    } else {
                        decoded.depth_write = flag;
                    }
                }
                _ => unreachable!("length checked above"),
            }
        }
        Ok(decoded)
    }
}

/// Render pass with one color attachment: cleared on load, stored, then presented
pub fn create_render_pass<G: Gpu + ?Sized>(gpu: &G, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // Wait for the acquire semaphore before writing the attachment
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    Ok(gpu.create_render_pass(&render_pass_info)?)
}

/// One framebuffer per swapchain image view. On failure none survive.
pub fn create_framebuffers<G: Gpu + ?Sized>(
    gpu: &G,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match gpu.create_framebuffer(&framebuffer_info) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    gpu.destroy_framebuffer(framebuffer);
                }
                return Err(e.into());
            }
        }
    }
    Ok(framebuffers)
}

/// Vertex input description for interleaved position + normal + uv vertices
pub fn vertex_input_description() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 3],
) {
    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(VERTEX_STRIDE)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    let attribute = |location: u32, format: vk::Format, offset: u32| {
        vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(location)
            .format(format)
            .offset(offset)
            .build()
    };

    (
        [binding],
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
            attribute(2, vk::Format::R32G32_SFLOAT, 24),
        ],
    )
}

fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Opaque => builder.blend_enable(false),
        BlendMode::Alpha => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
    .build()
}

/// Build a pipeline and its layout for `render_pass`
pub fn create_graphics_pipeline<G: Gpu + ?Sized>(
    gpu: &G,
    render_pass: vk::RenderPass,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    config: &PipelineConfig,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    if config.polygon_mode != vk::PolygonMode::FILL && !gpu.features().fill_mode_non_solid {
        return Err(RendererError::Unsupported("non-solid polygon mode"));
    }

    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    let (bindings, attributes) = vertex_input_description();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(config.topology)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(config.polygon_mode)
        .line_width(1.0)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Ignored by the device while the render pass has no depth attachment
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = &[blend_attachment(config.blend)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(PUSH_CONSTANT_STAGES)
        .offset(0)
        .size(std::mem::size_of::<DrawPushConstants>() as u32)
        .build();

    let push_constant_ranges = &[push_constant_range];
    let layout_info =
        vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(push_constant_ranges);

    let pipeline_layout = gpu.create_pipeline_layout(&layout_info)?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    match gpu.create_graphics_pipeline(&pipeline_info) {
        Ok(pipeline) => Ok((pipeline, pipeline_layout)),
        Err(e) => {
            gpu.destroy_pipeline_layout(pipeline_layout);
            Err(e.into())
        }
    }
}
