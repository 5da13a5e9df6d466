// Resource loading
//
// Builds meshes, textures and shader modules and registers them in the
// resource table. A loader is cheap to clone and may be moved to streaming
// threads; uploads serialize on the transfer engine's command pool.

use ash::vk;
use std::sync::Arc;

use super::{Handle, Mesh, Resource, ResourceTable, Shader, Texture};
use crate::backend::buffer::{allocate_memory, DeviceBuffer};
use crate::backend::pipeline::VERTEX_FLOATS;
use crate::backend::shader::{create_shader_module, validate_stage};
use crate::backend::transfer::TransferEngine;
use crate::backend::Gpu;
use crate::error::{RendererError, Result};

/// Pixel format every texture is stored in, whatever the caller asks for
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const TEXTURE_BYTES_PER_PIXEL: u64 = 4;

pub struct ResourceLoader<G: Gpu> {
    gpu: Arc<G>,
    transfer: Arc<TransferEngine<G>>,
    table: Arc<ResourceTable>,
}

impl<G: Gpu> Clone for ResourceLoader<G> {
    fn clone(&self) -> Self {
        Self {
            gpu: self.gpu.clone(),
            transfer: self.transfer.clone(),
            table: self.table.clone(),
        }
    }
}

/// Interleave positions with optional normals and uvs into 8-float vertices
pub fn interleave_vertices(positions: &[f32], normals: &[f32], uvs: &[f32]) -> Result<Vec<f32>> {
    if positions.is_empty() || positions.len() % 3 != 0 {
        return Err(RendererError::InvalidArgument(format!(
            "vertex data must be a non-empty list of xyz triples, got {} floats",
            positions.len()
        )));
    }
    let vertex_count = positions.len() / 3;
    if !normals.is_empty() && normals.len() != positions.len() {
        return Err(RendererError::InvalidArgument(format!(
            "expected {} normal floats, got {}",
            positions.len(),
            normals.len()
        )));
    }
    if !uvs.is_empty() && uvs.len() != vertex_count * 2 {
        return Err(RendererError::InvalidArgument(format!(
            "expected {} uv floats, got {}",
            vertex_count * 2,
            uvs.len()
        )));
    }

    let mut interleaved = Vec::with_capacity(vertex_count * VERTEX_FLOATS);
    for i in 0..vertex_count {
        interleaved.extend_from_slice(&positions[i * 3..i * 3 + 3]);
        match normals.get(i * 3..i * 3 + 3) {
            Some(normal) => interleaved.extend_from_slice(normal),
            None => interleaved.extend_from_slice(&[0.0; 3]),
        }
        match uvs.get(i * 2..i * 2 + 2) {
            Some(uv) => interleaved.extend_from_slice(uv),
            None => interleaved.extend_from_slice(&[0.0; 2]),
        }
    }
    Ok(interleaved)
}

impl<G: Gpu> ResourceLoader<G> {
    pub fn new(gpu: Arc<G>, transfer: Arc<TransferEngine<G>>, table: Arc<ResourceTable>) -> Self {
        Self {
            gpu,
            transfer,
            table,
        }
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    /// Upload a mesh. Empty `normals`/`uvs` are zero-filled; empty `indices`
    /// gives a mesh drawn without an index buffer.
    pub fn load_mesh(
        &self,
        vertices: &[f32],
        indices: &[u32],
        normals: &[f32],
        uvs: &[f32],
    ) -> Result<Handle> {
        let interleaved = interleave_vertices(vertices, normals, uvs)?;
        let vertex_count = (vertices.len() / 3) as u32;
        if let Some(&bad) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(RendererError::InvalidArgument(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }

        let vertex_buffer = self.transfer.upload_to_device(
            bytemuck::cast_slice(&interleaved),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = if indices.is_empty() {
            DeviceBuffer::NULL
        } else {
            match self
                .transfer
                .upload_to_device(bytemuck::cast_slice(indices), vk::BufferUsageFlags::INDEX_BUFFER)
            {
                Ok(buffer) => buffer,
                Err(e) => {
                    vertex_buffer.destroy(self.gpu.as_ref());
                    return Err(e);
                }
            }
        };

        let mesh = Mesh {
            vertices: vertex_buffer,
            indices: index_buffer,
            vertex_count,
            index_count: indices.len() as u32,
        };
        let handle = self.table.register(self.gpu.as_ref(), Resource::Mesh(mesh))?;
        log::info!(
            "Loaded mesh {}: {} vertices, {} indices",
            handle,
            vertex_count,
            indices.len()
        );
        Ok(handle)
    }

    /// Upload RGBA8 pixels into a sampled image.
    ///
    /// `format` is accepted for interface compatibility; storage is always
    /// `R8G8B8A8_UNORM`.
    pub fn load_texture(&self, pixels: &[u8], width: u32, height: u32, format: u32) -> Result<Handle> {
        let max_size = self.gpu.properties().limits.max_image_dimension2_d;
        if width == 0 || height == 0 || width > max_size || height > max_size {
            return Err(RendererError::InvalidArgument(format!(
                "texture size {}x{} outside 1..={}",
                width, height, max_size
            )));
        }
        let byte_len = u64::from(width) * u64::from(height) * TEXTURE_BYTES_PER_PIXEL;
        if (pixels.len() as u64) < byte_len {
            return Err(RendererError::InvalidArgument(format!(
                "{}x{} texture needs {} bytes, got {}",
                width,
                height,
                byte_len,
                pixels.len()
            )));
        }
        if format != TEXTURE_FORMAT.as_raw() as u32 {
            log::debug!("Texture format {} requested, storing as {:?}", format, TEXTURE_FORMAT);
        }

        let extent = vk::Extent2D { width, height };
        let mut texture = Texture {
            extent,
            ..Default::default()
        };

        match self.build_texture(&mut texture, &pixels[..byte_len as usize]) {
            Ok(()) => {
                let handle = self
                    .table
                    .register(self.gpu.as_ref(), Resource::Texture(texture))?;
                log::info!("Loaded texture {}: {}x{}", handle, width, height);
                Ok(handle)
            }
            Err(e) => {
                log::error!("Texture load failed ({}x{}): {}", width, height, e);
                texture.destroy(self.gpu.as_ref());
                Err(e)
            }
        }
    }

    /// Fills in `texture` step by step so a failure leaves only what was created
    fn build_texture(&self, texture: &mut Texture, pixels: &[u8]) -> Result<()> {
        let gpu = self.gpu.as_ref();
        let families = gpu.queues().upload_families();

        let mut image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: texture.extent.width,
                height: texture.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if families.len() > 1 {
            image_info = image_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families);
        }
        texture.image = gpu.create_image(&image_info)?;

        texture.memory = allocate_memory(
            gpu,
            gpu.image_memory_requirements(texture.image),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        gpu.bind_image_memory(texture.image, texture.memory)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(texture.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        texture.view = gpu.create_image_view(&view_info)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_lod(0.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        texture.sampler = gpu.create_sampler(&sampler_info)?;

        self.transfer
            .upload_to_image(pixels, texture.image, texture.extent)
    }

    /// Wrap SPIR-V in a shader module tagged with `stage` (a raw stage bit)
    pub fn compile_shader(&self, bytecode: &[u8], stage: u32) -> Result<Handle> {
        let stage = validate_stage(stage)?;
        let module = create_shader_module(self.gpu.as_ref(), bytecode)?;
        let handle = self
            .table
            .register(self.gpu.as_ref(), Resource::Shader(Shader { module, stage }))?;
        log::info!(
            "Compiled {:?} shader {} ({} bytes)",
            stage,
            handle,
            bytecode.len()
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockGpu;
    use crate::resources::ResourceKind;

    const SPIRV: [u8; 20] = [
        0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0,
    ];

    fn loader() -> (Arc<MockGpu>, ResourceLoader<MockGpu>) {
        let gpu = Arc::new(MockGpu::new());
        let transfer = Arc::new(TransferEngine::new(gpu.clone()).unwrap());
        let loader = ResourceLoader::new(gpu.clone(), transfer, Arc::new(ResourceTable::new()));
        (gpu, loader)
    }

    #[test]
    fn interleave_zero_fills_missing_attributes() {
        let v = interleave_vertices(&[1.0, 2.0, 3.0], &[], &[0.5, 0.25]).unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.5, 0.25]);
    }

    #[test]
    fn interleave_rejects_mismatched_lengths() {
        assert!(interleave_vertices(&[1.0, 2.0], &[], &[]).is_err());
        assert!(interleave_vertices(&[0.0; 6], &[0.0; 3], &[]).is_err());
        assert!(interleave_vertices(&[0.0; 6], &[], &[0.0; 3]).is_err());
        assert!(interleave_vertices(&[], &[], &[]).is_err());
    }

    #[test]
    fn triangle_without_normals_or_uvs() {
        let (gpu, loader) = loader();
        let vertices = [0.0, 0.5, 0.0, -0.5, -0.5, 0.0, 0.5, -0.5, 0.0];

        let handle = loader.load_mesh(&vertices, &[0, 1, 2], &[], &[]).unwrap();

        assert!(handle.is_valid());
        assert_eq!(loader.table().len(), 1);
        let mesh = loader.table().mesh(handle).unwrap();
        assert_eq!(mesh.vertex_count, 3);
        assert_eq!(mesh.index_count, 3);
        assert!(mesh.is_indexed());
        assert_eq!(mesh.vertices.size, 3 * 32);
        assert_eq!(gpu.live("buffer"), 2);
    }

    #[test]
    fn non_indexed_mesh_has_no_index_buffer() {
        let (gpu, loader) = loader();
        let handle = loader.load_mesh(&[0.0; 9], &[], &[], &[]).unwrap();
        assert!(!loader.table().mesh(handle).unwrap().is_indexed());
        assert_eq!(gpu.live("buffer"), 1);
    }

    #[test]
    fn out_of_range_index_is_rejected_before_upload() {
        let (gpu, loader) = loader();
        assert!(loader.load_mesh(&[0.0; 9], &[0, 1, 3], &[], &[]).is_err());
        assert_eq!(gpu.buffer_copies(), 0);
    }

    #[test]
    fn failed_index_upload_releases_vertex_buffer() {
        let (gpu, loader) = loader();
        // staging + vertex buffer + index staging succeed, index buffer fails
        gpu.fail_after("buffer", 3);

        let result = loader.load_mesh(&[0.0; 9], &[0, 1, 2], &[], &[]);
        assert!(result.is_err());
        assert!(loader.table().is_empty());
        assert_eq!(gpu.live("buffer"), 0);
        assert_eq!(gpu.live("memory"), 0);
    }

    #[test]
    fn texture_format_argument_is_ignored() {
        let (gpu, loader) = loader();
        let pixels = [255u8; 2 * 2 * 4];
        let handle = loader
            .load_texture(&pixels, 2, 2, vk::Format::B8G8R8A8_SRGB.as_raw() as u32)
            .unwrap();

        let texture = loader.table().texture(handle).unwrap();
        assert_eq!(texture.extent, vk::Extent2D { width: 2, height: 2 });
        assert_eq!(gpu.live("image"), 1);
        assert_eq!(gpu.live("sampler"), 1);
        assert_eq!(gpu.image_copies(), 1);
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let (gpu, loader) = loader();
        assert!(matches!(
            loader.load_texture(&[0u8; 15], 2, 2, 0),
            Err(RendererError::InvalidArgument(_))
        ));
        assert_eq!(gpu.live("image"), 0);
    }

    #[test]
    fn texture_failure_partway_leaves_nothing() {
        let (gpu, loader) = loader();
        gpu.fail_next("sampler");

        let result = loader.load_texture(&[0u8; 16], 2, 2, 0);
        assert!(result.is_err());
        assert!(loader.table().is_empty());
        assert_eq!(gpu.live("image"), 0);
        assert_eq!(gpu.live("image_view"), 0);
        assert_eq!(gpu.live("memory"), 0);
    }

    #[test]
    fn shader_is_tagged_with_its_stage() {
        let (_gpu, loader) = loader();
        let handle = loader.compile_shader(&SPIRV, 0x10).unwrap();
        let shader = loader.table().shader(handle).unwrap();
        assert_eq!(shader.stage, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn bad_bytecode_issues_no_handle() {
        let (_gpu, loader) = loader();
        assert!(loader.compile_shader(&SPIRV[..7], 0x1).is_err());
        assert!(loader.compile_shader(&SPIRV, 0x3).is_err());
        assert_eq!(loader.table().count(ResourceKind::Shader), 0);
    }

    #[test]
    fn handles_increase_across_kinds() {
        let (_gpu, loader) = loader();
        let mesh = loader.load_mesh(&[0.0; 9], &[], &[], &[]).unwrap();
        let texture = loader.load_texture(&[0u8; 4], 1, 1, 0).unwrap();
        let shader = loader.compile_shader(&SPIRV, 0x1).unwrap();
        assert!(mesh < texture && texture < shader);
    }

    #[test]
    fn loader_moves_across_threads() {
        let (_gpu, loader) = loader();
        let worker = loader.clone();
        let handle = std::thread::spawn(move || worker.load_mesh(&[0.0; 9], &[], &[], &[]))
            .join()
            .unwrap()
            .unwrap();
        assert!(loader.table().lookup(handle).is_some());
    }
}
