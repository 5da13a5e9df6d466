// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (surface extensions, optional validation layers)
// - Physical device selection (first enumerated device)
// - Queue family discovery + logical device creation
// - Serialized queue access for the render thread and loader threads

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};

use super::gpu::{DeviceFeatures, Gpu, QueueSet, SurfaceSupport};
use crate::config::RendererConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const RAY_TRACING_PIPELINE: &CStr = c"VK_KHR_ray_tracing_pipeline";
const ACCELERATION_STRUCTURE: &CStr = c"VK_KHR_acceleration_structure";
const MESH_SHADER: &CStr = c"VK_EXT_mesh_shader";

/// Queue family indices picked from one scan over the device's families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Record the first family offering each capability; overlap is allowed.
    /// Returns `None` when no family supports graphics.
    pub fn discover(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let first_with = |flag: vk::QueueFlags| {
            families
                .iter()
                .position(|family| family.queue_count > 0 && family.queue_flags.contains(flag))
                .map(|index| index as u32)
        };

        let graphics = first_with(vk::QueueFlags::GRAPHICS)?;
        Some(Self {
            graphics,
            compute: first_with(vk::QueueFlags::COMPUTE).unwrap_or(graphics),
            transfer: first_with(vk::QueueFlags::TRANSFER).unwrap_or(graphics),
        })
    }

    /// Distinct families, one queue-create entry each
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.compute, self.transfer].into_iter().collect()
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    entry: Entry,

    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    queues: QueueSet,
    // Queues are externally synchronized; loader threads and the render thread share them
    queue_lock: Mutex<()>,

    // Device properties (cached for performance)
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    features: DeviceFeatures,
}

impl VulkanDevice {
    /// Create the device context: instance → physical device → logical device.
    ///
    /// Each step fails fast; anything created by an earlier step is destroyed
    /// before the error is returned.
    pub fn new(config: &RendererConfig) -> Result<Self> {
        log::info!("Creating Vulkan device for {}", config.app.name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let enable_validation = cfg!(debug_assertions)
            && config.device.validation_layers
            && Self::validation_layer_available(&entry);

        let instance = Self::create_instance(&entry, config, enable_validation)
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        match Self::create_on_instance(entry, instance, debug_utils) {
            Ok(device) => Ok(device),
            Err((e, instance, debug_utils)) => {
                unsafe {
                    if let Some((debug_utils, messenger)) = debug_utils {
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    // Steps after instance creation. On failure the instance objects are handed
    // back so `new` can tear them down.
    #[allow(clippy::type_complexity)]
    fn create_on_instance(
        entry: Entry,
        instance: ash::Instance,
        debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) -> std::result::Result<
        Self,
        (
            anyhow::Error,
            ash::Instance,
            Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
        ),
    > {
        let physical_device = match Self::pick_physical_device(&instance) {
            Ok(physical_device) => physical_device,
            Err(e) => return Err((e, instance, debug_utils)),
        };

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let Some(families) = QueueFamilies::discover(&queue_family_properties) else {
            return Err((
                anyhow::anyhow!("No graphics-capable queue family"),
                instance,
                debug_utils,
            ));
        };
        log::info!(
            "Queue families: graphics={} compute={} transfer={}",
            families.graphics,
            families.compute,
            families.transfer
        );

        let features = match Self::detect_features(&instance, physical_device) {
            Ok(features) => features,
            Err(e) => return Err((e, instance, debug_utils)),
        };

        let device =
            match Self::create_logical_device(&instance, physical_device, &families, features) {
                Ok(device) => device,
                Err(e) => return Err((e, instance, debug_utils)),
            };

        let queues = unsafe {
            QueueSet {
                graphics_family: families.graphics,
                compute_family: families.compute,
                transfer_family: families.transfer,
                graphics: device.get_device_queue(families.graphics, 0),
                compute: device.get_device_queue(families.compute, 0),
                transfer: device.get_device_queue(families.transfer, 0),
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            crate::info::device_name(&properties)
        );
        log::info!(
            "API Version: {}",
            crate::info::format_version(properties.api_version)
        );

        let surface_loader = khr::Surface::new(&entry, &instance);
        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        Ok(Self {
            device,
            physical_device,
            instance,
            entry,
            surface_loader,
            swapchain_loader,
            debug_utils,
            queues,
            queue_lock: Mutex::new(()),
            properties,
            memory_properties,
            features,
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            log::warn!("Validation layers requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        config: &RendererConfig,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(config.app.name.as_str())?;
        let engine_name = c"Quantum";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(config.app_version())
            .engine_name(engine_name)
            .engine_version(config.app_version())
            .api_version(config.api_version());

        let extensions = Self::surface_extensions(entry, enable_validation)?;

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(instance)
    }

    /// VK_KHR_surface plus every platform surface extension the loader offers,
    /// so any platform window can be attached later.
    fn surface_extensions(entry: &Entry, enable_validation: bool) -> Result<Vec<*const c_char>> {
        let available = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let is_available = |name: &CStr| {
            available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        };

        if !is_available(khr::Surface::name()) {
            anyhow::bail!("VK_KHR_surface is not available");
        }

        let platform = [
            khr::AndroidSurface::name(),
            khr::Win32Surface::name(),
            khr::XlibSurface::name(),
            khr::XcbSurface::name(),
            khr::WaylandSurface::name(),
            ext::MetalSurface::name(),
        ];

        let mut extensions = vec![khr::Surface::name().as_ptr()];
        for name in platform {
            if is_available(name) {
                log::debug!("Enabling instance extension {:?}", name);
                extensions.push(name.as_ptr());
            }
        }
        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }
        Ok(extensions)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// First enumerated device wins; no suitability scoring.
    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        for (index, &device) in devices.iter().enumerate() {
            let props = unsafe { instance.get_physical_device_properties(device) };
            log::debug!("Found device {}: {}", index, crate::info::device_name(&props));
        }

        devices
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No Vulkan devices found"))
    }

    fn detect_features(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<DeviceFeatures> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .context("Failed to enumerate device extensions")?;
        let has = |name: &CStr| {
            extensions
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        };
        let core = unsafe { instance.get_physical_device_features(physical_device) };

        Ok(DeviceFeatures {
            ray_tracing: has(RAY_TRACING_PIPELINE) && has(ACCELERATION_STRUCTURE),
            mesh_shaders: has(MESH_SHADER),
            fill_mode_non_solid: core.fill_mode_non_solid == vk::TRUE,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
        features: DeviceFeatures,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let enabled_features = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: if features.fill_mode_non_solid { vk::TRUE } else { vk::FALSE },
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&enabled_features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
}

impl Gpu for VulkanDevice {
    fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn features(&self) -> DeviceFeatures {
        self.features
    }

    fn queues(&self) -> &QueueSet {
        &self.queues
    }

    fn wait_idle(&self) -> VkResult<()> {
        let _queues = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle() }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, data: &[u8]) -> VkResult<()> {
        unsafe {
            let ptr = self.device.map_memory(
                memory,
                0,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8;
            ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        unsafe { self.device.create_sampler(info, None) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| e)?;
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);
        unsafe { self.device.create_command_pool(&pool_info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer_to_image(cmd, src, dst, layout, regions) }
    }

    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        }
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32)
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, 0, data) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, 1, 0, 0) }
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&fence_info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let _queues = self.queue_lock.lock();
        unsafe { self.device.queue_submit(queue, submits, fence) }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        let _queues = self.queue_lock.lock();
        unsafe { self.device.queue_wait_idle(queue) }
    }

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        unsafe { ash_window::create_surface(&self.entry, &self.instance, display, window, None) }
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) }
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, surface)?,
            })
        }
    }

    fn supports_present(&self, queue_family: u32, surface: vk::SurfaceKHR) -> VkResult<bool> {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                queue_family,
                surface,
            )
        }
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        let _queues = self.queue_lock.lock();
        unsafe { self.swapchain_loader.queue_present(queue, info) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("device_wait_idle failed during shutdown: {}", e);
        }

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_universal_family_serves_everything() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let found = QueueFamilies::discover(&families).unwrap();
        assert_eq!(
            found,
            QueueFamilies { graphics: 0, compute: 0, transfer: 0 }
        );
        assert_eq!(found.unique().len(), 1);
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let found = QueueFamilies::discover(&families).unwrap();
        assert_eq!(found.graphics, 2);
        assert_eq!(found.compute, 1);
        assert_eq!(found.transfer, 0);
        assert_eq!(found.unique().into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_compute_and_transfer_alias_graphics() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let found = QueueFamilies::discover(&families).unwrap();
        assert_eq!(found.compute, found.graphics);
        assert_eq!(found.transfer, found.graphics);
    }

    #[test]
    fn no_graphics_family_is_unrecoverable() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(QueueFamilies::discover(&families).is_none());
        assert!(QueueFamilies::discover(&[]).is_none());
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(QueueFamilies::discover(&families).unwrap().graphics, 1);
    }
}
