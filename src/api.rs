// Host-facing surface
//
// Flattens `Renderer` results into the shapes a foreign binding layer can
// pass across its boundary: booleans for operations, `0` for failed loads.
// Errors are logged here and never escape.

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::backend::{Gpu, VulkanDevice};
use crate::config::RendererConfig;
use crate::error::Result;
use crate::info::DeviceInfo;
use crate::renderer::Renderer;
use crate::resources::Handle;

/// One renderer as seen by the host. Calls made before a successful
/// `initialize` fail without side effects.
pub struct RendererInstance<G: Gpu = VulkanDevice> {
    config: RendererConfig,
    renderer: Option<Renderer<G>>,
}

impl<G: Gpu> RendererInstance<G> {
    pub fn create(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.renderer.is_some()
    }

    /// Initialize against a device supplied by `connect`
    pub fn initialize_with<F>(&mut self, connect: F) -> bool
    where
        F: FnOnce(&RendererConfig) -> Result<Arc<G>>,
    {
        if self.renderer.is_some() {
            log::warn!("Renderer already initialized");
            return true;
        }
        let renderer = connect(&self.config)
            .and_then(|gpu| Renderer::from_device(gpu, self.config.clone()));
        match renderer {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                true
            }
            Err(e) => {
                log::error!("Renderer initialization failed: {}", e);
                false
            }
        }
    }

    /// Shut the renderer down. The instance can be initialized again.
    pub fn destroy(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }

    pub fn renderer(&self) -> Option<&Renderer<G>> {
        self.renderer.as_ref()
    }

    fn with<T>(&mut self, op: &str, f: impl FnOnce(&mut Renderer<G>) -> Result<T>) -> Option<T> {
        let Some(renderer) = self.renderer.as_mut() else {
            log::error!("{}: renderer is not initialized", op);
            return None;
        };
        match f(renderer) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("{} failed: {}", op, e);
                None
            }
        }
    }

    fn load(&mut self, op: &str, f: impl FnOnce(&mut Renderer<G>) -> Result<Handle>) -> u64 {
        self.with(op, f).unwrap_or(Handle::INVALID).0
    }

    // ── surface & frames ─────────────────────────────────────────────────────

    pub fn set_surface(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> bool {
        self.with("set_surface", |r| r.attach_surface(display, window, width, height))
            .is_some()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        self.with("resize", |r| r.resize(width, height)).is_some()
    }

    /// False when no frame was started, including while presentation is
    /// suspended. `end_frame` is only needed after `true`.
    pub fn begin_frame(&mut self) -> bool {
        self.with("begin_frame", |r| r.begin_frame()).unwrap_or(false)
    }

    pub fn end_frame(&mut self) -> bool {
        self.with("end_frame", |r| r.end_frame()).is_some()
    }

    // ── render state ─────────────────────────────────────────────────────────

    pub fn bind_pipeline(&mut self, pipeline: u64) -> bool {
        self.with("bind_pipeline", |r| r.bind_pipeline(Handle(pipeline)))
            .is_some()
    }

    pub fn submit_mesh(&mut self, mesh: u64, transform: &[f32; 16], color: [f32; 4]) -> bool {
        self.with("submit_mesh", |r| r.submit_mesh(Handle(mesh), transform, color))
            .is_some()
    }

    pub fn set_view_projection(&mut self, view: &[f32; 16], projection: &[f32; 16]) -> bool {
        self.with("set_view_projection", |r| {
            r.set_view_projection(view, projection);
            Ok(())
        })
        .is_some()
    }

    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) -> bool {
        self.with("set_clear_color", |renderer| {
            renderer.set_clear_color(r, g, b, a);
            Ok(())
        })
        .is_some()
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) -> bool {
        self.with("set_viewport", |r| r.set_viewport(x, y, width, height))
            .is_some()
    }

    // ── resources ────────────────────────────────────────────────────────────

    pub fn load_mesh(&mut self, vertices: &[f32], indices: &[u32], normals: &[f32], uvs: &[f32]) -> u64 {
        self.load("load_mesh", |r| r.load_mesh(vertices, indices, normals, uvs))
    }

    /// Pixels are always treated as RGBA8; `format` is accepted and ignored
    pub fn load_texture(&mut self, pixels: &[u8], width: u32, height: u32, format: u32) -> u64 {
        self.load("load_texture", |r| r.load_texture(pixels, width, height, format))
    }

    pub fn compile_shader(&mut self, bytecode: &[u8], stage: u32) -> u64 {
        self.load("compile_shader", |r| r.compile_shader(bytecode, stage))
    }

    pub fn create_graphics_pipeline(&mut self, vertex_shader: u64, fragment_shader: u64, config: &[i32]) -> u64 {
        self.load("create_graphics_pipeline", |r| {
            r.create_graphics_pipeline(Handle(vertex_shader), Handle(fragment_shader), config)
        })
    }

    pub fn release(&mut self, handle: u64) {
        if let Some(renderer) = self.renderer.as_ref() {
            renderer.release(Handle(handle));
        }
    }

    // ── compute / ray tracing ────────────────────────────────────────────────

    pub fn dispatch_compute(&mut self, shader: u64, x: u32, y: u32, z: u32) -> bool {
        self.with("dispatch_compute", |r| r.dispatch_compute(Handle(shader), x, y, z))
            .is_some()
    }

    pub fn supports_ray_tracing(&self) -> bool {
        self.renderer
            .as_ref()
            .is_some_and(|r| r.supports_ray_tracing())
    }

    pub fn trace_rays(&mut self, raygen: u64, miss: u64, hit: u64, width: u32, height: u32) -> bool {
        self.with("trace_rays", |r| {
            r.trace_rays(Handle(raygen), Handle(miss), Handle(hit), width, height)
        })
        .is_some()
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.renderer.as_ref().map(|r| r.device_info())
    }
}

impl RendererInstance<VulkanDevice> {
    /// Bring up the Vulkan device described by the instance's configuration
    pub fn initialize(&mut self) -> bool {
        self.initialize_with(|config| {
            VulkanDevice::new(config)
                .map(Arc::new)
                .map_err(crate::error::RendererError::Initialization)
        })
    }
}
