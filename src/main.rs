// =============================================================================
// QE RENDERER DEMO - Spinning triangle on the device-resident backend
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop                                               │
// │    └── Renderer (device, resource table, transfer engine)       │
// │          └── Presentation surface (swapchain per window)        │
// │                └── Frame scheduler (fence, semaphores, cmds)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. begin_frame: wait for the previous fence, acquire an image
// 2. bind_pipeline + submit_mesh: queue draw records
// 3. end_frame: record, submit and present
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use qe_renderer::{Handle, Renderer, RendererConfig};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

const VERTEX_SPV: &str = "shaders/mesh.vert.spv";
const FRAGMENT_SPV: &str = "shaders/mesh.frag.spv";

const TRIANGLE_POSITIONS: [f32; 9] = [0.0, -0.6, 0.0, 0.6, 0.5, 0.0, -0.6, 0.5, 0.0];
const TRIANGLE_UVS: [f32; 6] = [0.5, 0.0, 1.0, 1.0, 0.0, 1.0];

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = RendererConfig::load();

    init_logging(&config);
    log::info!("Starting QE renderer demo");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Log to stderr, or to `debug.log_file` when file logging is enabled
fn init_logging(config: &RendererConfig) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    let file_error = match config.debug.open_log_file() {
        Ok(Some(file)) => {
            builder.target(Target::Pipe(Box::new(file)));
            None
        }
        Ok(None) => None,
        Err(e) => Some(e),
    };
    builder.init();

    if let Some(e) = file_error {
        log::warn!("File logging disabled: {:#}", e);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters: the renderer (and its surface) drops before the window
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: RendererConfig,
    scene: Option<Scene>,
    started: Instant,
}

/// Handles the demo draws with
struct Scene {
    mesh: Handle,
    pipeline: Option<Handle>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            scene: None,
            started: Instant::now(),
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let mut renderer = Renderer::new(self.config.clone())?;

        let info = renderer.device_info();
        log::info!(
            "Using {} ({}), Vulkan {}, driver {}",
            info.name,
            info.device_type,
            info.api_version,
            info.driver_version
        );

        let size = window.inner_size();
        renderer.attach_surface(
            window.raw_display_handle(),
            window.raw_window_handle(),
            size.width,
            size.height,
        )?;

        let mesh = renderer.load_mesh(&TRIANGLE_POSITIONS, &[0, 1, 2], &[], &TRIANGLE_UVS)?;
        let pipeline = match load_pipeline(&renderer) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                log::warn!("No pipeline, frames will only clear: {:#}", e);
                None
            }
        };

        self.scene = Some(Scene { mesh, pipeline });
        self.renderer = Some(renderer);
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<bool> {
        let (Some(renderer), Some(scene)) = (self.renderer.as_mut(), self.scene.as_ref()) else {
            return Ok(false);
        };

        let t = self.started.elapsed().as_secs_f32();
        let aspect = self
            .window
            .as_ref()
            .map(|w| w.inner_size())
            .filter(|size| size.height > 0)
            .map_or(1.0, |size| size.width as f32 / size.height as f32);
        let projection = Mat4::orthographic_rh(-aspect, aspect, -1.0, 1.0, -1.0, 1.0);
        renderer.set_view_projection(&Mat4::IDENTITY.to_cols_array(), &projection.to_cols_array());

        if !renderer.begin_frame()? {
            return Ok(false);
        }

        // The frame is closed even if a draw fails, or the next begin_frame is refused
        let drawn = draw_scene(renderer, scene, t);
        renderer.end_frame()?;
        drawn?;
        Ok(true)
    }
}

fn draw_scene(renderer: &mut Renderer, scene: &Scene, t: f32) -> Result<()> {
    let Some(pipeline) = scene.pipeline else {
        return Ok(());
    };
    renderer.bind_pipeline(pipeline)?;
    let transform = Mat4::from_rotation_z(t);
    let pulse = 0.5 + 0.5 * t.sin();
    renderer.submit_mesh(scene.mesh, &transform.to_cols_array(), [1.0, pulse, 0.3, 1.0])?;
    Ok(())
}

fn load_pipeline(renderer: &Renderer) -> Result<Handle> {
    let vs_bytes = read_spirv(VERTEX_SPV)?;
    let fs_bytes = read_spirv(FRAGMENT_SPV)?;

    let vs = renderer.compile_shader(&vs_bytes, vk::ShaderStageFlags::VERTEX.as_raw())?;
    let fs = renderer.compile_shader(&fs_bytes, vk::ShaderStageFlags::FRAGMENT.as_raw())?;
    // Triangle list, no culling so the spin shows both faces
    let pipeline = renderer.create_graphics_pipeline(vs, fs, &[0, 0])?;
    Ok(pipeline)
}

fn read_spirv(path: &str) -> Result<Vec<u8>> {
    std::fs::read(Path::new(path)).with_context(|| format!("Failed to read {}", path))
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:#}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.shutdown();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(e) = renderer.resize(size.width, size.height) {
                        log::error!("Resize failed: {}", e);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    log::error!("Render error: {:#}", e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
