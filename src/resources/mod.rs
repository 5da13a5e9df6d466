// GPU resources owned by the resource table
//
// Each kind knows how to destroy its own device objects. Destruction skips
// null handles, so a partially built resource can be destroyed the same way.

pub mod loader;
pub mod table;

use ash::vk;
use std::fmt;

use crate::backend::buffer::DeviceBuffer;
use crate::backend::Gpu;

pub use loader::ResourceLoader;
pub use table::ResourceTable;

/// Opaque resource identifier. Never reused; `0` means "no resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(pub u64);

impl Handle {
    pub const INVALID: Handle = Handle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Mesh,
    Texture,
    Shader,
    Pipeline,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Mesh => "mesh",
            ResourceKind::Texture => "texture",
            ResourceKind::Shader => "shader",
            ResourceKind::Pipeline => "pipeline",
        })
    }
}

/// Vertex buffer plus optional index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    pub vertices: DeviceBuffer,
    /// `DeviceBuffer::NULL` for non-indexed meshes
    pub indices: DeviceBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Mesh {
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_null()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shader {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Mesh(Mesh),
    Texture(Texture),
    Shader(Shader),
    Pipeline(Pipeline),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Mesh(_) => ResourceKind::Mesh,
            Resource::Texture(_) => ResourceKind::Texture,
            Resource::Shader(_) => ResourceKind::Shader,
            Resource::Pipeline(_) => ResourceKind::Pipeline,
        }
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        match self {
            Resource::Mesh(mesh) => {
                mesh.vertices.destroy(gpu);
                mesh.indices.destroy(gpu);
            }
            Resource::Texture(texture) => texture.destroy(gpu),
            Resource::Shader(shader) => {
                if shader.module != vk::ShaderModule::null() {
                    gpu.destroy_shader_module(shader.module);
                }
            }
            Resource::Pipeline(pipeline) => {
                if pipeline.pipeline != vk::Pipeline::null() {
                    gpu.destroy_pipeline(pipeline.pipeline);
                }
                if pipeline.layout != vk::PipelineLayout::null() {
                    gpu.destroy_pipeline_layout(pipeline.layout);
                }
            }
        }
    }
}

impl Texture {
    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        if self.sampler != vk::Sampler::null() {
            gpu.destroy_sampler(self.sampler);
        }
        if self.view != vk::ImageView::null() {
            gpu.destroy_image_view(self.view);
        }
        if self.image != vk::Image::null() {
            gpu.destroy_image(self.image);
        }
        if self.memory != vk::DeviceMemory::null() {
            gpu.free_memory(self.memory);
        }
    }
}
