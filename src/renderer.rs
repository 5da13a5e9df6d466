// =============================================================================
// RENDERER - Device context, resources, presentation and frames in one place
// =============================================================================
//
// OWNERSHIP:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer                                                       │
// │    ├── Arc<Gpu>            device context, shared by all parts  │
// │    ├── TransferEngine      staging uploads                      │
// │    ├── ResourceTable       sole owner of meshes/textures/...    │
// │    ├── PresentationSurface swapchain, views, pass, framebuffers │
// │    └── FrameScheduler      fence, semaphores, command buffers   │
// └─────────────────────────────────────────────────────────────────┘
//
// Shutdown order: device idle, frame objects, surface, resources, transfer pool.
// The device itself goes when the last Arc (renderer or loader clone) drops.
//
// =============================================================================

use ash::vk;
use glam::{Mat4, Vec4};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::backend::pipeline::{self, PipelineConfig};
use crate::backend::swapchain::PresentationSurface;
use crate::backend::transfer::TransferEngine;
use crate::backend::{Gpu, VulkanDevice};
use crate::config::RendererConfig;
use crate::error::{RendererError, Result};
use crate::frame::{FramePhase, FrameScheduler, RenderState, Viewport};
use crate::info::DeviceInfo;
use crate::resources::{Handle, Pipeline, Resource, ResourceLoader, ResourceTable};

pub struct Renderer<G: Gpu = VulkanDevice> {
    gpu: Arc<G>,
    config: RendererConfig,
    transfer: Arc<TransferEngine<G>>,
    table: Arc<ResourceTable>,
    loader: ResourceLoader<G>,
    surface: Option<PresentationSurface<G>>,
    frames: FrameScheduler<G>,
    render: RenderState,
    shut_down: bool,
}

impl Renderer<VulkanDevice> {
    /// Bring up a Vulkan device and everything that depends on it
    pub fn new(config: RendererConfig) -> Result<Self> {
        let device = VulkanDevice::new(&config).map_err(RendererError::Initialization)?;
        Self::from_device(Arc::new(device), config)
    }
}

impl<G: Gpu> Renderer<G> {
    pub fn from_device(gpu: Arc<G>, config: RendererConfig) -> Result<Self> {
        let transfer = Arc::new(TransferEngine::new(gpu.clone())?);
        let frames = FrameScheduler::new(gpu.clone())?;
        let table = Arc::new(ResourceTable::new());
        let loader = ResourceLoader::new(gpu.clone(), transfer.clone(), table.clone());
        let render = RenderState::new(config.graphics.clear_color);

        log::info!("Renderer ready");
        Ok(Self {
            gpu,
            config,
            transfer,
            table,
            loader,
            surface: None,
            frames,
            render,
            shut_down: false,
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            Err(RendererError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn ensure_idle_frame(&self) -> Result<()> {
        if self.frames.phase().holds_image() {
            Err(RendererError::FrameInProgress)
        } else {
            Ok(())
        }
    }

    // ── presentation ─────────────────────────────────────────────────────────

    /// Create the platform surface and build its swapchain. An existing
    /// surface is torn down first.
    pub fn attach_surface(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.ensure_running()?;
        self.ensure_idle_frame()?;

        if let Some(mut previous) = self.surface.take() {
            log::info!("Replacing presentation surface");
            previous.teardown();
        }

        let surface = PresentationSurface::attach(
            self.gpu.clone(),
            display,
            window,
            width,
            height,
            self.config.present_mode(),
        )?;
        self.surface = Some(surface);
        Ok(())
    }

    fn surface_mut(&mut self) -> Result<&mut PresentationSurface<G>> {
        self.surface.as_mut().ok_or(RendererError::NoSurface)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.ensure_running()?;
        self.ensure_idle_frame()?;
        self.surface_mut()?.resize(width, height)
    }

    /// Tear the swapchain down and rebuild it on the same surface
    pub fn invalidate(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.ensure_idle_frame()?;
        self.surface_mut()?.invalidate()
    }

    // ── frames ───────────────────────────────────────────────────────────────

    /// Returns `Ok(false)` when presentation is suspended; calling
    /// `end_frame` afterwards is allowed but not required.
    pub fn begin_frame(&mut self) -> Result<bool> {
        self.ensure_running()?;
        let surface = self.surface.as_mut().ok_or(RendererError::NoSurface)?;
        self.frames.begin_frame(surface, &self.table)
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.ensure_running()?;
        let surface = self.surface.as_mut().ok_or(RendererError::NoSurface)?;
        self.frames.end_frame(surface, &self.render)
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.frames.phase()
    }

    /// Use `handle` for the draws that follow in this frame
    pub fn bind_pipeline(&mut self, handle: Handle) -> Result<()> {
        let pipeline = self.table.pipeline(handle)?;
        self.frames.bind_pipeline(pipeline)
    }

    /// Queue `mesh` with a column-major model matrix. An unresolved handle
    /// drops this draw only; the frame stays valid.
    pub fn submit_mesh(&mut self, mesh: Handle, transform: &[f32; 16], color: [f32; 4]) -> Result<()> {
        let resolved = self.table.mesh(mesh).map_err(|e| {
            log::warn!("Dropping draw: {}", e);
            e
        })?;
        self.frames.submit_draw(
            resolved,
            Mat4::from_cols_array(transform),
            Vec4::from_array(color),
        )
    }

    pub fn set_view_projection(&mut self, view: &[f32; 16], projection: &[f32; 16]) {
        self.render.view = Mat4::from_cols_array(view);
        self.render.projection = Mat4::from_cols_array(projection);
    }

    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.render.clear_color = [r, g, b, a];
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.render.clear_color
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) -> Result<()> {
        let finite = [x, y, width, height].iter().all(|v| v.is_finite());
        if !finite || width <= 0.0 || height <= 0.0 {
            return Err(RendererError::InvalidArgument(format!(
                "viewport {}x{} at ({}, {})",
                width, height, x, y
            )));
        }
        self.render.viewport = Some(Viewport {
            x,
            y,
            width,
            height,
        });
        Ok(())
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.render.viewport
    }

    // ── resources ────────────────────────────────────────────────────────────

    /// Cloneable loader for other threads
    pub fn loader(&self) -> ResourceLoader<G> {
        self.loader.clone()
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn load_mesh(
        &self,
        vertices: &[f32],
        indices: &[u32],
        normals: &[f32],
        uvs: &[f32],
    ) -> Result<Handle> {
        self.ensure_running()?;
        self.loader.load_mesh(vertices, indices, normals, uvs)
    }

    /// `format` is not honoured: pixels are read and stored as `R8G8B8A8_UNORM`
    pub fn load_texture(&self, pixels: &[u8], width: u32, height: u32, format: u32) -> Result<Handle> {
        self.ensure_running()?;
        self.loader.load_texture(pixels, width, height, format)
    }

    pub fn compile_shader(&self, bytecode: &[u8], stage: u32) -> Result<Handle> {
        self.ensure_running()?;
        self.loader.compile_shader(bytecode, stage)
    }

    /// Build a pipeline against the current surface's render pass
    pub fn create_graphics_pipeline(
        &self,
        vertex_shader: Handle,
        fragment_shader: Handle,
        config: &[i32],
    ) -> Result<Handle> {
        self.ensure_running()?;
        let config = PipelineConfig::decode(config)?;
        let vs = self.shader_for_stage(vertex_shader, vk::ShaderStageFlags::VERTEX)?;
        let fs = self.shader_for_stage(fragment_shader, vk::ShaderStageFlags::FRAGMENT)?;

        let render_pass = self
            .surface
            .as_ref()
            .and_then(|surface| surface.state())
            .map(|state| state.render_pass)
            .ok_or(RendererError::NoSurface)?;

        let (pipeline, layout) =
            pipeline::create_graphics_pipeline(self.gpu.as_ref(), render_pass, vs, fs, &config)?;
        let handle = self.table.register(
            self.gpu.as_ref(),
            Resource::Pipeline(Pipeline { pipeline, layout }),
        )?;
        log::info!(
            "Created pipeline {} from shaders {} and {} ({:?})",
            handle,
            vertex_shader,
            fragment_shader,
            config
        );
        Ok(handle)
    }

    fn shader_for_stage(&self, handle: Handle, expected: vk::ShaderStageFlags) -> Result<vk::ShaderModule> {
        let shader = self.table.shader(handle)?;
        if shader.stage != expected {
            return Err(RendererError::WrongShaderStage {
                handle,
                expected,
                actual: shader.stage,
            });
        }
        Ok(shader.module)
    }

    /// Drop `handle` from the table; its device objects go once no frame can use them.
    /// Unknown or already released handles are ignored.
    pub fn release(&self, handle: Handle) {
        if self.table.release(handle, self.frames.frame_in_use()) {
            self.table.collect(self.frames.completed(), self.gpu.as_ref());
        } else {
            log::debug!("Release of unknown handle {} ignored", handle);
        }
    }

    // ── compute / ray tracing ────────────────────────────────────────────────

    pub fn dispatch_compute(&self, shader: Handle, x: u32, y: u32, z: u32) -> Result<()> {
        self.shader_for_stage(shader, vk::ShaderStageFlags::COMPUTE)?;
        log::warn!("Compute dispatch {}x{}x{} requested but not implemented", x, y, z);
        Err(RendererError::Unsupported("compute dispatch"))
    }

    pub fn supports_ray_tracing(&self) -> bool {
        self.gpu.features().ray_tracing
    }

    pub fn trace_rays(
        &self,
        raygen: Handle,
        miss: Handle,
        hit: Handle,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if !self.supports_ray_tracing() {
            return Err(RendererError::Unsupported("ray tracing on this device"));
        }
        for handle in [raygen, miss, hit] {
            self.table.shader(handle)?;
        }
        log::warn!("Ray dispatch {}x{} requested but not implemented", width, height);
        Err(RendererError::Unsupported("ray tracing dispatch"))
    }

    // ── info & lifecycle ─────────────────────────────────────────────────────

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::query(self.gpu.as_ref())
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Wait for the device and destroy everything this renderer created.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Cleaning up Vulkan resources...");

        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device idle wait failed during shutdown: {}", e);
        }
        self.frames.destroy();
        if let Some(mut surface) = self.surface.take() {
            surface.teardown();
        }
        self.table.drain_all(self.gpu.as_ref());
        self.transfer.destroy();

        log::info!("Cleanup complete");
    }
}

impl<G: Gpu> Drop for Renderer<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
