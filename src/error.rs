// Renderer error taxonomy
//
// Every fallible operation in the library returns `Result<T>`. The host-facing
// layer in `api` flattens these into booleans and sentinel handles.

use ash::vk;
use thiserror::Error;

use crate::resources::{Handle, ResourceKind};

pub type Result<T> = std::result::Result<T, RendererError>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("renderer is not initialized")]
    NotInitialized,

    /// Device bring-up failed; carries the full context chain
    #[error("initialization failed: {0:#}")]
    Initialization(anyhow::Error),

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("no memory type in filter {type_bits:#b} provides {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("no live {kind} with handle {handle}")]
    UnresolvedHandle { kind: ResourceKind, handle: Handle },

    #[error("handle {handle} is a {actual}, expected a {expected}")]
    WrongKind {
        handle: Handle,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("shader {handle} has stage {actual:?}, expected {expected:?}")]
    WrongShaderStage {
        handle: Handle,
        expected: vk::ShaderStageFlags,
        actual: vk::ShaderStageFlags,
    },

    #[error("invalid SPIR-V: {0}")]
    InvalidSpirv(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no presentation surface attached")]
    NoSurface,

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("a frame is already in progress")]
    FrameInProgress,

    #[error("no frame in progress")]
    NoFrameInProgress,

    #[error("no pipeline bound for this frame")]
    NoPipelineBound,

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

impl RendererError {
    /// True for failures caused by referencing a handle that is not (or no longer) live
    pub fn is_unresolved_handle(&self) -> bool {
        matches!(self, Self::UnresolvedHandle { .. } | Self::WrongKind { .. })
    }
}
