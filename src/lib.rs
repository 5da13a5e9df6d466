//! Device-resident Vulkan rendering backend.
//!
//! A [`Renderer`] owns one logical device and everything created on it:
//! a handle-indexed resource table, a staging upload path, the presentation
//! surface with its swapchain, and a single-frame-in-flight scheduler.
//! [`api::RendererInstance`] flattens it for a foreign binding layer.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod info;
pub mod renderer;
pub mod resources;

pub use api::RendererInstance;
pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use frame::{FramePhase, Viewport};
pub use info::DeviceInfo;
pub use renderer::Renderer;
pub use resources::{Handle, ResourceKind, ResourceLoader};
