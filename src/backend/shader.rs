// Shader module loading
//
// SPIR-V arrives as bytes from the host. It is re-packed into aligned words
// before module creation, so callers can hand over any byte slice.

use ash::vk;
use std::io::Cursor;

use super::gpu::Gpu;
use crate::error::{RendererError, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Single pipeline stages a shader module may be tagged with
const SINGLE_STAGES: [vk::ShaderStageFlags; 6] = [
    vk::ShaderStageFlags::VERTEX,
    vk::ShaderStageFlags::FRAGMENT,
    vk::ShaderStageFlags::COMPUTE,
    vk::ShaderStageFlags::GEOMETRY,
    vk::ShaderStageFlags::TESSELLATION_CONTROL,
    vk::ShaderStageFlags::TESSELLATION_EVALUATION,
];

/// Decode and sanity-check SPIR-V bytecode into native-endian words
pub fn parse_spirv(bytecode: &[u8]) -> Result<Vec<u32>> {
    if bytecode.is_empty() || bytecode.len() % 4 != 0 {
        return Err(RendererError::InvalidSpirv(format!(
            "length {} is not a non-zero multiple of 4",
            bytecode.len()
        )));
    }

    // read_spv handles alignment and byte-swapped modules
    let words = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| RendererError::InvalidSpirv(e.to_string()))?;

    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(RendererError::InvalidSpirv("missing magic number".to_string()));
    }
    Ok(words)
}

/// Accepts raw `VkShaderStageFlagBits` naming exactly one supported stage
pub fn validate_stage(raw: u32) -> Result<vk::ShaderStageFlags> {
    let stage = vk::ShaderStageFlags::from_raw(raw);
    if SINGLE_STAGES.contains(&stage) {
        Ok(stage)
    } else {
        Err(RendererError::InvalidArgument(format!(
            "shader stage {:#x} is not a single supported stage",
            raw
        )))
    }
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module<G: Gpu + ?Sized>(gpu: &G, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let words = parse_spirv(bytecode)?;
    Ok(gpu.create_shader_module(&words)?)
}
