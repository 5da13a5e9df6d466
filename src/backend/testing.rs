// Recording device for tests
//
// Fabricates handles, tracks which objects are alive per kind, completes GPU
// work instantly on submit and reports TIMEOUT when asked to wait on a fence
// nobody will signal (a real device would hang there).

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::{HashMap, HashSet, VecDeque};

use super::gpu::{DeviceFeatures, Gpu, QueueSet, SurfaceSupport};

pub const DEVICE_LOCAL_TYPE: u32 = 0;
pub const HOST_VISIBLE_TYPE: u32 = 1;

/// Parameters of the most recent swapchain creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainRecord {
    pub min_image_count: u32,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    live: HashMap<&'static str, HashSet<u64>>,
    failures: HashMap<&'static str, usize>,
    invalid_destroys: usize,
    events: Vec<String>,

    object_sizes: HashMap<u64, vk::DeviceSize>,
    memory_contents: HashMap<u64, Vec<u8>>,
    fences: HashMap<u64, bool>,
    swapchain_image_counts: HashMap<u64, u32>,
    next_image: u32,
    last_swapchain: Option<SwapchainRecord>,

    surface: SurfaceSupport,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,

    submits: usize,
    presents: usize,
    buffer_copies: usize,
    image_copies: usize,
    barriers: Vec<(vk::ImageLayout, vk::ImageLayout)>,
    draws: usize,
    indexed_draws: usize,
    device_idle_waits: usize,
    queue_idle_waits: usize,
    last_clear: Option<[f32; 4]>,
    last_viewport: Option<vk::Viewport>,
    push_constants: Vec<Vec<u8>>,
}

pub struct MockGpu {
    state: Mutex<MockState>,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queues: QueueSet,
    features: DeviceFeatures,
}

pub fn surface_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub fn window_handles() -> (RawDisplayHandle, RawWindowHandle) {
    (
        RawDisplayHandle::Xlib(raw_window_handle::XlibDisplayHandle::empty()),
        RawWindowHandle::Xlib(raw_window_handle::XlibWindowHandle::empty()),
    )
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    pub fn new() -> Self {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 3, 250),
            driver_version: vk::make_api_version(0, 2, 0, 279),
            vendor_id: 0x10de,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = 16384;
        for (dst, src) in properties.device_name.iter_mut().zip(b"Mock GPU".iter()) {
            *dst = *src as std::ffi::c_char;
        }

        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory_properties.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[HOST_VISIBLE_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let queues = QueueSet {
            graphics_family: 0,
            compute_family: 0,
            transfer_family: 0,
            graphics: vk::Queue::from_raw(0x1000),
            compute: vk::Queue::from_raw(0x1000),
            transfer: vk::Queue::from_raw(0x1000),
        };

        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                surface: surface_support(),
                ..Default::default()
            }),
            properties,
            memory_properties,
            queues,
            features: DeviceFeatures {
                ray_tracing: false,
                mesh_shaders: false,
                fill_mode_non_solid: true,
            },
        }
    }

    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features = features;
        self
    }

    // ── test controls ────────────────────────────────────────────────────────

    /// Make the next creation of `kind` fail with ERROR_OUT_OF_DEVICE_MEMORY
    pub fn fail_next(&self, kind: &'static str) {
        self.fail_after(kind, 0);
    }

    /// Let `skip` creations of `kind` succeed, then fail the one after
    pub fn fail_after(&self, kind: &'static str, skip: usize) {
        self.state.lock().failures.insert(kind, skip);
    }

    pub fn script_acquire(&self, result: vk::Result) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: vk::Result) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.lock().surface.capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.lock().surface = support;
    }

    // ── inspection ───────────────────────────────────────────────────────────

    pub fn live(&self, kind: &str) -> usize {
        self.state.lock().live.get(kind).map_or(0, HashSet::len)
    }

    pub fn total_live(&self) -> usize {
        self.state.lock().live.values().map(HashSet::len).sum()
    }

    pub fn invalid_destroys(&self) -> usize {
        self.state.lock().invalid_destroys
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state.lock().memory_contents.get(&memory.as_raw()).cloned()
    }

    pub fn last_swapchain(&self) -> Option<SwapchainRecord> {
        self.state.lock().last_swapchain
    }

    pub fn submits(&self) -> usize {
        self.state.lock().submits
    }

    pub fn presents(&self) -> usize {
        self.state.lock().presents
    }

    pub fn buffer_copies(&self) -> usize {
        self.state.lock().buffer_copies
    }

    pub fn image_copies(&self) -> usize {
        self.state.lock().image_copies
    }

    pub fn barriers(&self) -> Vec<(vk::ImageLayout, vk::ImageLayout)> {
        self.state.lock().barriers.clone()
    }

    pub fn draws(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.draws, state.indexed_draws)
    }

    pub fn device_idle_waits(&self) -> usize {
        self.state.lock().device_idle_waits
    }

    pub fn queue_idle_waits(&self) -> usize {
        self.state.lock().queue_idle_waits
    }

    pub fn last_clear(&self) -> Option<[f32; 4]> {
        self.state.lock().last_clear
    }

    pub fn last_viewport(&self) -> Option<vk::Viewport> {
        self.state.lock().last_viewport
    }

    pub fn push_constants(&self) -> Vec<Vec<u8>> {
        self.state.lock().push_constants.clone()
    }

    // ── bookkeeping ──────────────────────────────────────────────────────────

    fn create(&self, kind: &'static str) -> VkResult<u64> {
        let mut state = self.state.lock();
        if let Some(skip) = state.failures.get_mut(kind) {
            if *skip == 0 {
                state.failures.remove(kind);
                state.events.push(format!("fail {kind}"));
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            *skip -= 1;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.live.entry(kind).or_default().insert(id);
        state.events.push(format!("create {kind}"));
        Ok(id)
    }

    fn destroy(&self, kind: &'static str, id: u64) {
        let mut state = self.state.lock();
        let removed = state.live.get_mut(kind).is_some_and(|ids| ids.remove(&id));
        if removed {
            state.events.push(format!("destroy {kind}"));
        } else {
            state.invalid_destroys += 1;
        }
        state.object_sizes.remove(&id);
        state.memory_contents.remove(&id);
        state.fences.remove(&id);
        state.swapchain_image_counts.remove(&id);
    }

    fn requirements(&self, id: u64) -> vk::MemoryRequirements {
        let size = self.state.lock().object_sizes.get(&id).copied().unwrap_or(256);
        vk::MemoryRequirements {
            size,
            alignment: 16,
            memory_type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
        }
    }
}

impl Gpu for MockGpu {
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
        let mut state = self.state.lock();
        state.device_idle_waits += 1;
        state.events.push("wait_idle".to_string());
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let id = self.create("buffer")?;
        self.state.lock().object_sizes.insert(id, info.size);
        Ok(vk::Buffer::from_raw(id))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy("buffer", buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.requirements(buffer.as_raw())
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn allocate_memory(&self, _info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        self.create("memory").map(vk::DeviceMemory::from_raw)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.destroy("memory", memory.as_raw());
    }

    fn write_memory(&self, memory: vk::DeviceMemory, data: &[u8]) -> VkResult<()> {
        self.state
            .lock()
            .memory_contents
            .insert(memory.as_raw(), data.to_vec());
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let id = self.create("image")?;
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4;
        self.state.lock().object_sizes.insert(id, size);
        Ok(vk::Image::from_raw(id))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy("image", image.as_raw());
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.requirements(image.as_raw())
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        self.create("image_view").map(vk::ImageView::from_raw)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("image_view", view.as_raw());
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        self.create("sampler").map(vk::Sampler::from_raw)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy("sampler", sampler.as_raw());
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        self.create("shader_module").map(vk::ShaderModule::from_raw)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("shader_module", module.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        self.create("pipeline_layout").map(vk::PipelineLayout::from_raw)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("pipeline_layout", layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        _info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        self.create("pipeline").map(vk::Pipeline::from_raw)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("pipeline", pipeline.as_raw());
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        self.create("render_pass").map(vk::RenderPass::from_raw)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("render_pass", render_pass.as_raw());
    }

    fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        self.create("framebuffer").map(vk::Framebuffer::from_raw)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("framebuffer", framebuffer.as_raw());
    }

    fn create_command_pool(
        &self,
        _queue_family: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        self.create("command_pool").map(vk::CommandPool::from_raw)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy("command_pool", pool.as_raw());
        // Destroying a pool frees its buffers
        self.state.lock().live.remove("command_buffer");
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        (0..count)
            .map(|_| self.create("command_buffer").map(vk::CommandBuffer::from_raw))
            .collect()
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for buffer in buffers {
            self.destroy("command_buffer", buffer.as_raw());
        }
    }

    fn begin_command_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Buffer,
        _regions: &[vk::BufferCopy],
    ) {
        self.state.lock().buffer_copies += 1;
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Image,
        _layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().image_copies += 1;
    }

    fn cmd_image_barrier(
        &self,
        _cmd: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        self.state
            .lock()
            .barriers
            .push((barrier.old_layout, barrier.new_layout));
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        if info.clear_value_count > 0 && !info.p_clear_values.is_null() {
            // SAFETY: the caller's clear value array outlives this call
            let color = unsafe { (*info.p_clear_values).color.float32 };
            self.state.lock().last_clear = Some(color);
        }
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state.lock().last_viewport = Some(viewport);
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {}

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_bind_index_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.state.lock().push_constants.push(data.to_vec());
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, _vertex_count: u32) {
        self.state.lock().draws += 1;
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, _index_count: u32) {
        self.state.lock().indexed_draws += 1;
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.create("semaphore").map(vk::Semaphore::from_raw)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("semaphore", semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let id = self.create("fence")?;
        self.state.lock().fences.insert(id, signaled);
        Ok(vk::Fence::from_raw(id))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.destroy("fence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        match self.state.lock().fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            Some(false) => Err(vk::Result::TIMEOUT),
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        match self.state.lock().fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        _submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.submits += 1;
        if fence != vk::Fence::null() {
            match state.fences.get_mut(&fence.as_raw()) {
                // Work completes instantly
                Some(signaled) => *signaled = true,
                None => return Err(vk::Result::ERROR_DEVICE_LOST),
            }
        }
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.state.lock().queue_idle_waits += 1;
        Ok(())
    }

    fn create_surface(
        &self,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        self.create("surface").map(vk::SurfaceKHR::from_raw)
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.destroy("surface", surface.as_raw());
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        Ok(self.state.lock().surface.clone())
    }

    fn supports_present(&self, _queue_family: u32, _surface: vk::SurfaceKHR) -> VkResult<bool> {
        Ok(true)
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let id = self.create("swapchain")?;
        let mut state = self.state.lock();
        state.swapchain_image_counts.insert(id, info.min_image_count);
        state.last_swapchain = Some(SwapchainRecord {
            min_image_count: info.min_image_count,
            extent: info.image_extent,
            format: info.image_format,
            present_mode: info.present_mode,
        });
        state.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(id))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy("swapchain", swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state.lock();
        let count = state
            .swapchain_image_counts
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        // Swapchain-owned images are not tracked as live objects
        let images = (0..count)
            .map(|_| {
                let id = state.next_id;
                state.next_id += 1;
                vk::Image::from_raw(id)
            })
            .collect();
        Ok(images)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        let count = state
            .swapchain_image_counts
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let scripted = state.acquire_script.pop_front();
        if let Some(vk::Result::ERROR_OUT_OF_DATE_KHR) = scripted {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let index = state.next_image % count;
        state.next_image += 1;
        Ok((index, scripted == Some(vk::Result::SUBOPTIMAL_KHR)))
    }

    fn queue_present(&self, _queue: vk::Queue, _info: &vk::PresentInfoKHR) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.presents += 1;
        match state.present_script.pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
            None => Ok(false),
        }
    }
}
