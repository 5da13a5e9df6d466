// Read-only device capability reporting

use ash::vk;
use serde::Serialize;

use crate::backend::Gpu;

/// Snapshot of the selected device, as handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub api_version: String,
    pub driver_version: String,
    pub vendor_id: u32,
    pub device_type: String,
    pub max_texture_size: u32,
    pub supports_ray_tracing: bool,
    pub supports_mesh_shaders: bool,
}

impl DeviceInfo {
    pub fn query<G: Gpu + ?Sized>(gpu: &G) -> Self {
        let props = gpu.properties();
        let features = gpu.features();
        Self {
            name: device_name(props),
            api_version: format_version(props.api_version),
            driver_version: format_version(props.driver_version),
            vendor_id: props.vendor_id,
            device_type: device_type_name(props.device_type).to_string(),
            max_texture_size: props.limits.max_image_dimension2_d,
            supports_ray_tracing: features.ray_tracing,
            supports_mesh_shaders: features.mesh_shaders,
        }
    }
}

/// Dotted `major.minor.patch` from a packed Vulkan version
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

pub fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Device name up to the first NUL; lossy if the driver reports invalid UTF-8
pub fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    let bytes: Vec<u8> = props
        .device_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
