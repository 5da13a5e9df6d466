// Backend module - Vulkan abstraction layer
//
// Everything that issues Vulkan calls goes through the `Gpu` trait;
// `VulkanDevice` is the ash-backed implementation.

pub mod buffer;
pub mod device;
pub mod gpu;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use device::VulkanDevice;
pub use gpu::{DeviceFeatures, Gpu, QueueSet, SurfaceSupport};
