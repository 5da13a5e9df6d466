// Buffer utilities for staging, vertex and index buffers
//
// Raw buffer + dedicated memory pairs. Destruction skips null handles, so a
// half-built or already-destroyed pair can always be passed to `destroy`.

use ash::vk;

use super::gpu::Gpu;
use crate::error::{RendererError, Result};

/// A buffer with its own device memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl DeviceBuffer {
    pub const NULL: Self = Self {
        buffer: vk::Buffer::null(),
        memory: vk::DeviceMemory::null(),
        size: 0,
    };

    pub fn is_null(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        if self.buffer != vk::Buffer::null() {
            gpu.destroy_buffer(self.buffer);
        }
        if self.memory != vk::DeviceMemory::null() {
            gpu.free_memory(self.memory);
        }
    }
}

/// Find a memory type allowed by `type_filter` that has every bit in `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);
        has_type && has_properties
    })
}

/// Allocate memory satisfying `requirements` with the `required` properties
pub fn allocate_memory<G: Gpu + ?Sized>(
    gpu: &G,
    requirements: vk::MemoryRequirements,
    required: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(gpu.memory_properties(), requirements.memory_type_bits, required)
            .ok_or(RendererError::NoMemoryType {
                type_bits: requirements.memory_type_bits,
                required,
            })?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    Ok(gpu.allocate_memory(&alloc_info)?)
}

/// Create a GPU buffer with specified usage and memory properties.
///
/// `sharing_families` with more than one entry switches the buffer to
/// CONCURRENT sharing across those queue families.
pub fn create_buffer<G: Gpu + ?Sized>(
    gpu: &G,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
    sharing_families: &[u32],
) -> Result<DeviceBuffer> {
    if size == 0 {
        return Err(RendererError::InvalidArgument(
            "buffer size must be non-zero".to_string(),
        ));
    }

    let mut buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    if sharing_families.len() > 1 {
        buffer_info = buffer_info
            .sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(sharing_families);
    }

    let mut created = DeviceBuffer {
        buffer: gpu.create_buffer(&buffer_info)?,
        size,
        ..DeviceBuffer::NULL
    };

    let bound = allocate_memory(gpu, gpu.buffer_memory_requirements(created.buffer), memory_properties)
        .and_then(|memory| {
            created.memory = memory;
            Ok(gpu.bind_buffer_memory(created.buffer, memory)?)
        });

    match bound {
        Ok(()) => Ok(created),
        Err(e) => {
            created.destroy(gpu);
            Err(e)
        }
    }
}

/// Host-visible, host-coherent buffer filled with `data`
pub fn create_host_buffer<G: Gpu + ?Sized>(
    gpu: &G,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<DeviceBuffer> {
    let buffer = create_buffer(
        gpu,
        data.len() as vk::DeviceSize,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        &[],
    )?;

    if let Err(e) = gpu.write_memory(buffer.memory, data) {
        buffer.destroy(gpu);
        return Err(e.into());
    }

    Ok(buffer)
}
